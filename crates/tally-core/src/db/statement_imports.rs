//! Statement import rows and checkpoints
//!
//! Status changes go through `crate::lifecycle`; the functions here are the
//! raw writes it composes inside its transactions.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_datetime, parse_enum_column, Database};
use crate::error::Result;
use crate::models::{
    CheckpointStage, ImportCheckpoint, ImportMetadata, ImportStatus, NewStatementImport,
    ParsingMethod, StatementImport,
};

const IMPORT_COLUMNS: &str = "id, user_id, account_id, file_name, file_path, file_hash, status, \
     parsing_method, total_transactions, imported_transactions, failed_transactions, \
     duplicate_transactions, metadata, correlation_id, created_at, completed_at";

fn row_to_import(row: &Row) -> rusqlite::Result<StatementImport> {
    let status: String = row.get(6)?;
    let parsing_method: Option<String> = row.get(7)?;
    let metadata: String = row.get(12)?;
    let created_at: String = row.get(14)?;
    let completed_at: Option<String> = row.get(15)?;

    let metadata: ImportMetadata = serde_json::from_str(&metadata).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StatementImport {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        file_name: row.get(3)?,
        file_path: row.get(4)?,
        file_hash: row.get(5)?,
        status: parse_enum_column(6, &status)?,
        parsing_method: parsing_method
            .as_deref()
            .map(|s| parse_enum_column::<ParsingMethod>(7, s))
            .transpose()?,
        total_transactions: row.get(8)?,
        imported_transactions: row.get(9)?,
        failed_transactions: row.get(10)?,
        duplicate_transactions: row.get(11)?,
        metadata,
        correlation_id: row.get(13)?,
        created_at: parse_datetime(&created_at),
        completed_at: completed_at.as_deref().map(parse_datetime),
    })
}

pub(crate) fn load_import(conn: &Connection, import_id: i64) -> Result<Option<StatementImport>> {
    let import = conn
        .query_row(
            &format!("SELECT {} FROM statement_imports WHERE id = ?", IMPORT_COLUMNS),
            params![import_id],
            row_to_import,
        )
        .optional()?;
    Ok(import)
}

/// Compare-and-set status. Returns false when the row was not in `expected`.
pub(crate) fn swap_status(
    conn: &Connection,
    import_id: i64,
    expected: ImportStatus,
    next: ImportStatus,
) -> Result<bool> {
    let completed = next.is_terminal();
    let changed = conn.execute(
        r#"
        UPDATE statement_imports SET
            status = ?,
            completed_at = CASE WHEN ? THEN CURRENT_TIMESTAMP ELSE completed_at END
        WHERE id = ? AND status = ?
        "#,
        params![next.as_str(), completed, import_id, expected.as_str()],
    )?;
    Ok(changed > 0)
}

pub(crate) fn write_metadata(
    conn: &Connection,
    import_id: i64,
    metadata: &ImportMetadata,
) -> Result<()> {
    conn.execute(
        "UPDATE statement_imports SET metadata = ? WHERE id = ?",
        params![serde_json::to_string(metadata)?, import_id],
    )?;
    Ok(())
}

pub(crate) fn write_parsing_method(
    conn: &Connection,
    import_id: i64,
    method: ParsingMethod,
) -> Result<()> {
    conn.execute(
        "UPDATE statement_imports SET parsing_method = ? WHERE id = ?",
        params![method.as_str(), import_id],
    )?;
    Ok(())
}

pub(crate) fn write_file_hash(conn: &Connection, import_id: i64, file_hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE statement_imports SET file_hash = ? WHERE id = ? AND file_hash IS NULL",
        params![file_hash, import_id],
    )?;
    Ok(())
}

/// Final counters for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ImportCounts {
    pub total: i64,
    pub imported: i64,
    pub failed: i64,
    pub duplicates: i64,
}

pub(crate) fn write_counts(conn: &Connection, import_id: i64, counts: ImportCounts) -> Result<()> {
    conn.execute(
        r#"
        UPDATE statement_imports SET
            total_transactions = ?,
            imported_transactions = ?,
            failed_transactions = ?,
            duplicate_transactions = ?
        WHERE id = ?
        "#,
        params![
            counts.total,
            counts.imported,
            counts.failed,
            counts.duplicates,
            import_id
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_checkpoint(
    conn: &Connection,
    import_id: i64,
    correlation_id: &str,
    stage: CheckpointStage,
    transaction_count: i64,
    accounted_drops: i64,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO import_checkpoints
            (import_id, correlation_id, stage, transaction_count, accounted_drops)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![
            import_id,
            correlation_id,
            stage.as_str(),
            transaction_count,
            accounted_drops
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Other imports of the same file bytes
pub(crate) fn imports_sharing_file(
    conn: &Connection,
    file_hash: &str,
    exclude_import_id: i64,
) -> Result<Vec<StatementImport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM statement_imports WHERE file_hash = ? AND id != ? ORDER BY id",
        IMPORT_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![file_hash, exclude_import_id], row_to_import)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl Database {
    /// Create a pending import with a fresh correlation id
    pub fn create_statement_import(&self, new: &NewStatementImport) -> Result<StatementImport> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let metadata = ImportMetadata {
            correlation_id: Some(correlation_id.clone()),
            ..Default::default()
        };

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO statement_imports
                (user_id, account_id, file_name, file_path, file_hash, metadata, correlation_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                new.user_id,
                new.account_id,
                new.file_name,
                new.file_path,
                new.file_hash,
                serde_json::to_string(&metadata)?,
                correlation_id,
            ],
        )?;
        let id = conn.last_insert_rowid();

        load_import(&conn, id)?.ok_or_else(|| {
            crate::error::Error::NotFound(format!("Statement import {} vanished after insert", id))
        })
    }

    /// Get an import by ID
    pub fn get_statement_import(&self, import_id: i64) -> Result<Option<StatementImport>> {
        let conn = self.conn()?;
        load_import(&conn, import_id)
    }

    /// List a user's imports, newest first
    pub fn list_statement_imports(&self, user_id: &str, limit: i64) -> Result<Vec<StatementImport>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM statement_imports WHERE user_id = ? ORDER BY id DESC LIMIT ?",
            IMPORT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, limit], row_to_import)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Checkpoints for an import in write order
    pub fn list_checkpoints(&self, import_id: i64) -> Result<Vec<ImportCheckpoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, import_id, correlation_id, stage, transaction_count, accounted_drops, created_at
            FROM import_checkpoints
            WHERE import_id = ?
            ORDER BY id
            "#,
        )?;

        let rows = stmt
            .query_map(params![import_id], |row| {
                let stage: String = row.get(3)?;
                let created_at: String = row.get(6)?;
                Ok(ImportCheckpoint {
                    id: row.get(0)?,
                    import_id: row.get(1)?,
                    correlation_id: row.get(2)?,
                    stage: parse_enum_column::<CheckpointStage>(3, &stage)?,
                    transaction_count: row.get(4)?,
                    accounted_drops: row.get(5)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
