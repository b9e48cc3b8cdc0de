//! Content-addressed OCR cache

use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::OcrResult;

/// Cache of OCR text keyed by file content hash.
///
/// Byte-identical uploads share one entry, so the OCR engine and the
/// structured extractor each run at most once per distinct file.
#[derive(Clone)]
pub struct OcrCache {
    db: Database,
}

impl OcrCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Earliest entry for a file, if any
    pub fn get(&self, file_hash: &str) -> Result<Option<OcrResult>> {
        self.db.get_ocr_result(file_hash)
    }

    /// Store a new entry. Fails with `Error::Conflict` when the key exists.
    pub fn put(
        &self,
        file_hash: &str,
        ocr_content_hash: &str,
        markdown_text: &str,
        page_count: i64,
    ) -> Result<OcrResult> {
        self.db
            .insert_ocr_result(file_hash, ocr_content_hash, markdown_text, page_count)
    }

    /// Store an entry, treating a conflict as a hit on the existing row.
    ///
    /// Returns the entry and whether this call created it.
    pub fn get_or_put(
        &self,
        file_hash: &str,
        ocr_content_hash: &str,
        markdown_text: &str,
        page_count: i64,
    ) -> Result<(OcrResult, bool)> {
        match self.put(file_hash, ocr_content_hash, markdown_text, page_count) {
            Ok(result) => Ok((result, true)),
            Err(Error::Conflict(_)) => {
                debug!(file_hash, "OCR cache race lost, using existing entry");
                let existing = self
                    .db
                    .get_ocr_result_by_key(file_hash, ocr_content_hash)?
                    .ok_or_else(|| {
                        Error::NotFound(format!("OCR result for file {} after conflict", file_hash))
                    })?;
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Attach structured extractor output to an entry (first writer wins)
    pub fn store_structured(&self, ocr_result_id: i64, structured: &serde_json::Value) -> Result<bool> {
        self.db.set_ocr_structured_data(ocr_result_id, structured)
    }
}
