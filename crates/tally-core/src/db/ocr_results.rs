//! OCR cache table operations
//!
//! Rows are immutable apart from a single null -> value population of
//! `structured_data`. They are only ever removed by the integrity purge.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::OcrResult;

const OCR_COLUMNS: &str =
    "id, file_hash, ocr_content_hash, markdown_text, structured_data, page_count, created_at";

fn row_to_ocr_result(row: &Row) -> rusqlite::Result<OcrResult> {
    let structured: Option<String> = row.get(4)?;
    let created_at: String = row.get(6)?;

    Ok(OcrResult {
        id: row.get(0)?,
        file_hash: row.get(1)?,
        ocr_content_hash: row.get(2)?,
        markdown_text: row.get(3)?,
        // A corrupt cached document is treated as absent and re-extracted
        structured_data: structured.and_then(|s| serde_json::from_str(&s).ok()),
        page_count: row.get(5)?,
        created_at: parse_datetime(&created_at),
    })
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Remove every cache entry for a file (integrity purge only)
pub(crate) fn delete_ocr_results_for_file(conn: &Connection, file_hash: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM ocr_results WHERE file_hash = ?",
        params![file_hash],
    )?)
}

impl Database {
    /// Earliest cache entry for a file hash
    pub fn get_ocr_result(&self, file_hash: &str) -> Result<Option<OcrResult>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ocr_results WHERE file_hash = ? ORDER BY id LIMIT 1",
                    OCR_COLUMNS
                ),
                params![file_hash],
                row_to_ocr_result,
            )
            .optional()?;
        Ok(result)
    }

    /// Cache entry by exact key
    pub fn get_ocr_result_by_key(
        &self,
        file_hash: &str,
        ocr_content_hash: &str,
    ) -> Result<Option<OcrResult>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ocr_results WHERE file_hash = ? AND ocr_content_hash = ?",
                    OCR_COLUMNS
                ),
                params![file_hash, ocr_content_hash],
                row_to_ocr_result,
            )
            .optional()?;
        Ok(result)
    }

    /// Insert a cache entry.
    ///
    /// Returns `Error::Conflict` when `(file_hash, ocr_content_hash)` already exists.
    pub fn insert_ocr_result(
        &self,
        file_hash: &str,
        ocr_content_hash: &str,
        markdown_text: &str,
        page_count: i64,
    ) -> Result<OcrResult> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO ocr_results (file_hash, ocr_content_hash, markdown_text, page_count)
            VALUES (?, ?, ?, ?)
            "#,
            params![file_hash, ocr_content_hash, markdown_text, page_count],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::Conflict(format!(
                    "OCR result already cached for file {}",
                    file_hash
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        let result = conn.query_row(
            &format!("SELECT {} FROM ocr_results WHERE id = ?", OCR_COLUMNS),
            params![id],
            row_to_ocr_result,
        )?;
        Ok(result)
    }

    /// Populate structured data once. Returns false if it was already set.
    pub fn set_ocr_structured_data(
        &self,
        ocr_result_id: i64,
        structured: &serde_json::Value,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE ocr_results SET structured_data = ? WHERE id = ? AND structured_data IS NULL",
            params![serde_json::to_string(structured)?, ocr_result_id],
        )?;
        if updated == 0 {
            debug!(ocr_result_id, "Structured data already populated, keeping first value");
        }
        Ok(updated > 0)
    }

    /// Number of cache entries for a file hash
    pub fn count_ocr_results(&self, file_hash: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM ocr_results WHERE file_hash = ?",
            params![file_hash],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
