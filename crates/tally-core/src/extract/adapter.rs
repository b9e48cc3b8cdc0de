//! Extraction adapter
//!
//! Sits between the OCR cache and the extractor backend: a document already
//! attached to the OCR entry is reused, otherwise the backend runs once and
//! the validated document is attached for every later import of the file.

use tracing::{debug, info, warn};

use super::types::ExtractionResult;
use super::{ExtractorClient, StructuredExtractor};
use crate::error::{Error, Result};
use crate::models::OcrResult;
use crate::ocr::OcrCache;

/// A validated document and where it came from
#[derive(Debug, Clone)]
pub struct Extraction {
    pub result: ExtractionResult,
    pub cache_hit: bool,
}

#[derive(Clone)]
pub struct ExtractionAdapter {
    extractor: ExtractorClient,
    cache: OcrCache,
}

impl ExtractionAdapter {
    pub fn new(extractor: ExtractorClient, cache: OcrCache) -> Self {
        Self { extractor, cache }
    }

    pub fn extractor(&self) -> &ExtractorClient {
        &self.extractor
    }

    /// Produce the statement document for an OCR entry.
    ///
    /// Any backend failure or envelope defect is reported as
    /// `Error::Extraction`; nothing is cached in that case.
    pub async fn extract(&self, ocr: &OcrResult) -> Result<Extraction> {
        if let Some(ref cached) = ocr.structured_data {
            debug!(ocr_result_id = ocr.id, "Using cached structured data");
            let result = ExtractionResult::from_value(cached)?;
            return Ok(Extraction {
                result,
                cache_hit: true,
            });
        }

        let document = self
            .extractor
            .extract(&ocr.markdown_text)
            .await
            .map_err(|e| match e {
                Error::Extraction(msg) => Error::Extraction(msg),
                other => Error::Extraction(format!(
                    "extractor at {} failed: {}",
                    self.extractor.host(),
                    other
                )),
            })?;

        let result = ExtractionResult::from_value(&document)?;

        // First writer wins when two imports of one file extract concurrently
        if !self.cache.store_structured(ocr.id, &result.to_value()?)? {
            warn!(ocr_result_id = ocr.id, "Structured data already cached by a concurrent import");
        }

        info!(
            ocr_result_id = ocr.id,
            rows = result.transactions.len(),
            "Extracted statement document"
        );

        Ok(Extraction {
            result,
            cache_hit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::extract::MockExtractor;
    use serde_json::json;

    fn setup(extractor: MockExtractor) -> (ExtractionAdapter, OcrCache) {
        let cache = OcrCache::new(Database::in_memory().unwrap());
        (
            ExtractionAdapter::new(ExtractorClient::Mock(extractor), cache.clone()),
            cache,
        )
    }

    #[tokio::test]
    async fn test_second_extract_uses_cache() {
        let mock = MockExtractor::with_document(json!({
            "transactions": [{"date": "2024-01-01", "description": "A", "amount": 1}],
            "balances": {"closing": 10.0, "source": "closing_balance_line"}
        }));
        let (adapter, cache) = setup(mock.clone());

        let entry = cache.put("f", "c", "text", 1).unwrap();
        let first = adapter.extract(&entry).await.unwrap();
        assert!(!first.cache_hit);

        let entry = cache.get("f").unwrap().unwrap();
        let second = adapter.extract(&entry).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.result, first.result);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_is_extraction_error() {
        let (adapter, cache) = setup(MockExtractor::failing());
        let entry = cache.put("f", "c", "text", 1).unwrap();

        let err = adapter.extract(&entry).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
        assert!(cache.get("f").unwrap().unwrap().structured_data.is_none());
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_not_cached() {
        let (adapter, cache) = setup(MockExtractor::with_document(json!({"rows": []})));
        let entry = cache.put("f", "c", "text", 1).unwrap();

        let err = adapter.extract(&entry).await.unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
        assert!(cache.get("f").unwrap().unwrap().structured_data.is_none());
    }
}
