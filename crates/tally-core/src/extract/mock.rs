//! Mock extractor for testing
//!
//! Reads the markdown as a JSON document when it is one, which lets tests
//! drive the whole pipeline by uploading JSON through the mock OCR engine.
//! Anything else extracts to an empty document.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::StructuredExtractor;
use crate::error::{Error, Result};

#[derive(Clone, Default)]
pub struct MockExtractor {
    calls: Arc<AtomicUsize>,
    fail: bool,
    document: Option<Value>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extractor that returns the same document for any input
    pub fn with_document(document: Value) -> Self {
        Self {
            document: Some(document),
            ..Self::default()
        }
    }

    /// Extractor whose every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Number of extract calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredExtractor for MockExtractor {
    async fn extract(&self, markdown: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(Error::Extraction("mock extractor unavailable".into()));
        }

        if let Some(ref document) = self.document {
            return Ok(document.clone());
        }

        Ok(serde_json::from_str::<Value>(markdown.trim())
            .unwrap_or_else(|_| json!({ "transactions": [] })))
    }

    async fn health_check(&self) -> bool {
        !self.fail
    }

    fn host(&self) -> &str {
        "mock"
    }
}
