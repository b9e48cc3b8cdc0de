//! OCR engine boundary and the content-addressed OCR cache
//!
//! The OCR engine itself is external. This module provides:
//!
//! - `OcrEngine` trait: bytes in, markdown text out
//! - `OcrClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - `OcrCache`: immutable cache keyed by `(file_hash, ocr_content_hash)`
//!
//! # Configuration
//!
//! Environment variables:
//! - `OCR_BACKEND`: Backend to use (http, mock). Default: http
//! - `OCR_HOST`: OCR service URL (required for http backend)
//! - `OCR_API_KEY`: Bearer token for the OCR service (optional)

mod cache;
mod http;
mod mock;

pub use cache::OcrCache;
pub use http::HttpOcrEngine;
pub use mock::MockOcrEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// SHA-256 hex digest used for both file hashes and OCR content hashes
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Text recognized from one statement file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub markdown: String,
    pub page_count: i64,
}

/// Interface to an external OCR engine
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize the text of a statement file
    async fn recognize(&self, file_name: &str, data: &[u8]) -> Result<OcrOutput>;

    /// Host or identifier for logging
    fn host(&self) -> &str;
}

/// OCR client with compile-time dispatch
#[derive(Clone)]
pub enum OcrClient {
    Http(HttpOcrEngine),
    Mock(MockOcrEngine),
}

impl OcrClient {
    /// Create an OCR client from environment variables
    ///
    /// Returns None if the selected backend is not configured.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("OCR_BACKEND").unwrap_or_else(|_| "http".to_string());

        match backend.to_lowercase().as_str() {
            "http" => HttpOcrEngine::from_env().map(OcrClient::Http),
            "mock" => Some(OcrClient::Mock(MockOcrEngine::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown OCR_BACKEND, falling back to http");
                HttpOcrEngine::from_env().map(OcrClient::Http)
            }
        }
    }

    /// Create a mock client for testing
    pub fn mock() -> Self {
        OcrClient::Mock(MockOcrEngine::new())
    }
}

#[async_trait]
impl OcrEngine for OcrClient {
    async fn recognize(&self, file_name: &str, data: &[u8]) -> Result<OcrOutput> {
        match self {
            OcrClient::Http(e) => e.recognize(file_name, data).await,
            OcrClient::Mock(e) => e.recognize(file_name, data).await,
        }
    }

    fn host(&self) -> &str {
        match self {
            OcrClient::Http(e) => e.host(),
            OcrClient::Mock(e) => e.host(),
        }
    }
}
