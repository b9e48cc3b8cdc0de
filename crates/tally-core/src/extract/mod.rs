//! Structured extraction of statement documents
//!
//! Turns OCR markdown into a validated statement document. This module
//! provides:
//!
//! - `StructuredExtractor` trait: markdown in, JSON document out
//! - `ExtractorClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - `ExtractionAdapter`: caches the document on the OCR entry and validates it
//!
//! # Configuration
//!
//! Environment variables:
//! - `EXTRACTOR_BACKEND`: Backend to use (openai_compatible, ollama, mock).
//!   Default: openai_compatible
//! - `OPENAI_COMPATIBLE_HOST`, `OPENAI_COMPATIBLE_MODEL`, `OPENAI_COMPATIBLE_API_KEY`
//! - `OLLAMA_HOST`, `OLLAMA_MODEL`

mod adapter;
mod mock;
mod ollama;
mod openai_compatible;
pub mod parsing;
mod prompt;
mod types;

pub use adapter::{Extraction, ExtractionAdapter};
pub use mock::MockExtractor;
pub use ollama::OllamaExtractor;
pub use openai_compatible::OpenAICompatibleExtractor;
pub use prompt::build_prompt;
pub use types::{Balances, ExtractionResult, RawTransaction};

use async_trait::async_trait;

use crate::error::Result;

/// Interface to a structured-output model
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    /// Extract the statement document from OCR markdown
    async fn extract(&self, markdown: &str) -> Result<serde_json::Value>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Host URL for logging
    fn host(&self) -> &str;
}

/// Extractor client with compile-time dispatch
#[derive(Clone)]
pub enum ExtractorClient {
    OpenAICompatible(OpenAICompatibleExtractor),
    Ollama(OllamaExtractor),
    Mock(MockExtractor),
}

impl ExtractorClient {
    /// Create an extractor from environment variables
    ///
    /// Returns None if the selected backend is not configured.
    pub fn from_env() -> Option<Self> {
        let backend = std::env::var("EXTRACTOR_BACKEND")
            .unwrap_or_else(|_| "openai_compatible".to_string());

        match backend.to_lowercase().as_str() {
            "openai_compatible" | "openai" => {
                OpenAICompatibleExtractor::from_env().map(ExtractorClient::OpenAICompatible)
            }
            "ollama" => OllamaExtractor::from_env().map(ExtractorClient::Ollama),
            "mock" => Some(ExtractorClient::Mock(MockExtractor::new())),
            _ => {
                tracing::warn!(
                    backend = %backend,
                    "Unknown EXTRACTOR_BACKEND, falling back to openai_compatible"
                );
                OpenAICompatibleExtractor::from_env().map(ExtractorClient::OpenAICompatible)
            }
        }
    }

    /// Create a mock extractor for testing
    pub fn mock() -> Self {
        ExtractorClient::Mock(MockExtractor::new())
    }
}

#[async_trait]
impl StructuredExtractor for ExtractorClient {
    async fn extract(&self, markdown: &str) -> Result<serde_json::Value> {
        match self {
            ExtractorClient::OpenAICompatible(b) => b.extract(markdown).await,
            ExtractorClient::Ollama(b) => b.extract(markdown).await,
            ExtractorClient::Mock(b) => b.extract(markdown).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            ExtractorClient::OpenAICompatible(b) => b.health_check().await,
            ExtractorClient::Ollama(b) => b.health_check().await,
            ExtractorClient::Mock(b) => b.health_check().await,
        }
    }

    fn host(&self) -> &str {
        match self {
            ExtractorClient::OpenAICompatible(b) => b.host(),
            ExtractorClient::Ollama(b) => b.host(),
            ExtractorClient::Mock(b) => b.host(),
        }
    }
}
