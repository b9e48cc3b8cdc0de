//! Mock OCR engine for testing
//!
//! Treats the uploaded bytes as already-recognized text unless a fixed
//! output is configured. Clones share the call counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{OcrEngine, OcrOutput};
use crate::error::{Error, Result};

#[derive(Clone, Default)]
pub struct MockOcrEngine {
    calls: Arc<AtomicUsize>,
    fail: bool,
    fixed: Option<OcrOutput>,
}

impl MockOcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose every call fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Engine that returns the same output for any file
    pub fn with_output(markdown: &str, page_count: i64) -> Self {
        Self {
            fixed: Some(OcrOutput {
                markdown: markdown.to_string(),
                page_count,
            }),
            ..Self::default()
        }
    }

    /// Number of recognize calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn recognize(&self, _file_name: &str, data: &[u8]) -> Result<OcrOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(Error::Extraction("mock OCR engine unavailable".into()));
        }

        Ok(self.fixed.clone().unwrap_or_else(|| OcrOutput {
            markdown: String::from_utf8_lossy(data).to_string(),
            page_count: 1,
        }))
    }

    fn host(&self) -> &str {
        "mock"
    }
}
