//! Integrity purge
//!
//! Removes everything an import wrote after it turned out to be wrong (bad
//! OCR, wrong account, corrupted file). The ledger rows, the balance it set
//! and the cached OCR output all go in one transaction, and the import itself
//! moves to `failed` with an integrity flag so it can never be reprocessed
//! from the same cache entry.

use rusqlite::TransactionBehavior;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::db::{
    delete_import_transactions, delete_ocr_results_for_file, imports_sharing_file,
    insert_audit, load_account, load_import, restore_account_balance, swap_status, write_metadata,
    Database,
};
use crate::error::{Error, Result};
use crate::models::ImportStatus;

/// Flag appended to other imports that used the purged OCR entry
pub const SHARED_CACHE_FLAG: &str = "ocr_cache_purged";

/// What a purge removed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub import_id: i64,
    pub transactions_deleted: usize,
    pub ocr_results_deleted: usize,
    pub balance_restored: Option<f64>,
    /// Other imports of the same file, now flagged for review
    pub flagged_imports: Vec<i64>,
}

/// Purge a finished import.
///
/// Only `completed` and `review` imports can be purged. The account balance
/// is rolled back only if this import was the last one to set it, together
/// with the statement date and write time it had before.
pub fn purge_import(db: &Database, import_id: i64, reason: &str, actor: &str) -> Result<PurgeReport> {
    let mut conn = db.conn()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let import = load_import(&tx, import_id)?
        .ok_or_else(|| Error::NotFound(format!("Statement import {}", import_id)))?;

    if !matches!(import.status, ImportStatus::Review | ImportStatus::Completed) {
        return Err(Error::InvalidTransition {
            from: import.status.to_string(),
            to: ImportStatus::Failed.to_string(),
        });
    }

    let transactions_deleted = delete_import_transactions(&tx, import_id)?;

    let mut balance_restored = None;
    if let Some(account) = load_account(&tx, import.account_id)? {
        if account.balance_import_id == Some(import_id) {
            match import.metadata.previous_balance {
                Some(previous) => {
                    restore_account_balance(
                        &tx,
                        account.id,
                        previous,
                        import.metadata.previous_balance_as_of,
                        import.metadata.previous_balance_import_id,
                        import.metadata.previous_balance_updated_at,
                    )?;
                    balance_restored = Some(previous);
                }
                None => warn!(import_id, "No previous balance recorded, leaving balance as is"),
            }
        }
    }

    let mut ocr_results_deleted = 0;
    let mut flagged_imports = Vec::new();
    if let Some(ref file_hash) = import.file_hash {
        ocr_results_deleted = delete_ocr_results_for_file(&tx, file_hash)?;
        for mut other in imports_sharing_file(&tx, file_hash, import_id)? {
            if !other.metadata.integrity_flags.iter().any(|f| f == SHARED_CACHE_FLAG) {
                other
                    .metadata
                    .integrity_flags
                    .push(SHARED_CACHE_FLAG.to_string());
                write_metadata(&tx, other.id, &other.metadata)?;
            }
            flagged_imports.push(other.id);
        }
    }

    let mut metadata = import.metadata.clone();
    metadata.error = Some(format!("purged: {}", reason));
    metadata.integrity_flags.push("purged".to_string());
    write_metadata(&tx, import_id, &metadata)?;

    if !swap_status(&tx, import_id, import.status, ImportStatus::Failed)? {
        return Err(Error::Conflict(format!(
            "import {} changed status during purge",
            import_id
        )));
    }

    let report = PurgeReport {
        import_id,
        transactions_deleted,
        ocr_results_deleted,
        balance_restored,
        flagged_imports,
    };

    insert_audit(
        &tx,
        actor,
        "import_purged",
        Some("statement_import"),
        Some(import_id),
        Some(
            &json!({
                "reason": reason,
                "correlationId": import.correlation_id,
                "transactionsDeleted": report.transactions_deleted,
                "ocrResultsDeleted": report.ocr_results_deleted,
                "balanceRestored": report.balance_restored,
                "flaggedImports": report.flagged_imports,
            })
            .to_string(),
        ),
    )?;

    tx.commit()?;

    info!(
        import_id,
        actor,
        transactions_deleted = report.transactions_deleted,
        ocr_results_deleted = report.ocr_results_deleted,
        "Import purged"
    );
    Ok(report)
}
