//! Import state machine
//!
//! Every status change of a statement import goes through here:
//!
//! ```text
//! pending -> processing -> { review | completed | failed }
//! pending | processing -> cancelled
//! review | completed -> failed   (integrity purge only)
//! ```
//!
//! Status writes are compare-and-set on the previous status, so a cancel
//! racing a finalize leaves exactly one of them in effect. Finalization
//! inserts the ledger rows, reconciles the balance and writes counters,
//! metadata, status and the `post_insert` checkpoint in one SQLite
//! transaction.

use chrono::NaiveDate;
use rusqlite::TransactionBehavior;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::ImportContext;
use crate::db::{
    insert_audit, insert_checkpoint, insert_import_transaction, load_import, swap_status,
    write_counts, write_file_hash, write_metadata, write_parsing_method, Database, ImportCounts,
    InsertOutcome,
};
use crate::dedup::{DuplicateCheck, DuplicateDetector};
use crate::error::{Error, Result};
use crate::extract::Balances;
use crate::models::{
    CheckpointStage, CountRegression, ImportMetadata, ImportStatus, NormalizedTransaction,
    ParsingMethod, PossibleDuplicate, StatementImport,
};
use crate::reconcile::{BalanceReconciler, ReconcileRequest};

const PIPELINE_ACTOR: &str = "pipeline";
const IMPORT_ENTITY: &str = "statement_import";

pub const REVIEW_ROW_FAILURES: &str = "row_failures";
pub const REVIEW_AMBIGUOUS_BALANCE: &str = "ambiguous_balance";
pub const REVIEW_POSSIBLE_DUPLICATES: &str = "possible_duplicates";
pub const REVIEW_EMPTY_EXTRACTION: &str = "empty_extraction";

/// Everything finalization needs from the earlier stages
#[derive(Debug, Clone)]
pub struct FinalizeInput {
    /// Rows present in the extracted document
    pub extracted_rows: usize,
    /// Rows that survived validation and normalization, with their row index
    pub transactions: Vec<(usize, NormalizedTransaction)>,
    /// Rows dropped by validation or normalization
    pub failed_rows: usize,
    pub balances: Balances,
    /// Statement period end, or the import date
    pub statement_date: NaiveDate,
    /// Metadata gathered so far (cache hits, audit records, row errors)
    pub metadata: ImportMetadata,
}

fn terminal_status(every_row_failed: bool, reasons: &[String]) -> ImportStatus {
    if every_row_failed {
        ImportStatus::Failed
    } else if !reasons.is_empty() {
        ImportStatus::Review
    } else {
        ImportStatus::Completed
    }
}

fn require_import(conn: &rusqlite::Connection, import_id: i64) -> Result<StatementImport> {
    load_import(conn, import_id)?
        .ok_or_else(|| Error::NotFound(format!("Statement import {}", import_id)))
}

#[derive(Clone)]
pub struct ImportStateMachine {
    db: Database,
    reconciler_tolerance: f64,
}

impl ImportStateMachine {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            reconciler_tolerance: BalanceReconciler::default().tolerance,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Move an import into `processing`.
    ///
    /// Re-entering an import already in `processing` is allowed so a crashed
    /// or timed-out run can be retried. Terminal imports are rejected.
    pub fn begin_processing(&self, import_id: i64) -> Result<StatementImport> {
        let conn = self.db.conn()?;
        let import = require_import(&conn, import_id)?;

        if !import.status.can_transition_to(ImportStatus::Processing) {
            return Err(Error::InvalidTransition {
                from: import.status.to_string(),
                to: ImportStatus::Processing.to_string(),
            });
        }

        if !swap_status(&conn, import_id, import.status, ImportStatus::Processing)? {
            let current = require_import(&conn, import_id)?;
            return Err(Error::InvalidTransition {
                from: current.status.to_string(),
                to: ImportStatus::Processing.to_string(),
            });
        }

        if import.status == ImportStatus::Processing {
            info!(import_id, "Re-entering processing for retried import");
        }

        require_import(&conn, import_id)
    }

    /// Record the file hash and parsing method chosen for this run
    pub fn record_source(
        &self,
        ctx: &ImportContext,
        file_hash: &str,
        method: ParsingMethod,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        write_file_hash(&conn, ctx.import_id, file_hash)?;
        write_parsing_method(&conn, ctx.import_id, method)?;
        Ok(())
    }

    /// Append a stage-boundary checkpoint
    pub fn record_checkpoint(
        &self,
        ctx: &ImportContext,
        stage: CheckpointStage,
        transaction_count: usize,
        accounted_drops: usize,
    ) -> Result<()> {
        let conn = self.db.conn()?;
        insert_checkpoint(
            &conn,
            ctx.import_id,
            &ctx.correlation_id,
            stage,
            transaction_count as i64,
            accounted_drops as i64,
        )?;
        debug!(stage = stage.as_str(), transaction_count, accounted_drops, "Checkpoint");
        Ok(())
    }

    /// Finish a run: persist rows, reconcile, and set the terminal status.
    ///
    /// If the import left `processing` in the meantime (cancelled), nothing
    /// is written and the current row is returned.
    pub fn finalize(&self, ctx: &ImportContext, input: FinalizeInput) -> Result<StatementImport> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let import = require_import(&tx, ctx.import_id)?;
        if import.status != ImportStatus::Processing {
            warn!(status = %import.status, "Import left processing before finalize, discarding run");
            drop(tx);
            return require_import(&conn, ctx.import_id);
        }

        let mut metadata = input.metadata;
        metadata.correlation_id = Some(ctx.correlation_id.clone());

        // Classify every row before writing anything
        let mut detector = DuplicateDetector::new(ctx.account_id, ctx.import_id);
        let mut planned = Vec::with_capacity(input.transactions.len());
        let mut known_duplicates = 0usize;
        for (row_index, row) in &input.transactions {
            let key = detector.key_for(row);
            match detector.check(&tx, row, &key)? {
                DuplicateCheck::Duplicate(existing) => {
                    debug!(row_index, existing, "Skipping duplicate row");
                    known_duplicates += 1;
                }
                DuplicateCheck::PossibleDuplicate(existing) => {
                    metadata.possible_duplicates.push(PossibleDuplicate {
                        row_index: *row_index,
                        date: row.date,
                        description: row.description.clone(),
                        amount: row.amount,
                        existing_transaction_id: existing,
                    });
                    planned.push((row, key));
                }
                DuplicateCheck::New => planned.push((row, key)),
            }
        }

        insert_checkpoint(
            &tx,
            ctx.import_id,
            &ctx.correlation_id,
            CheckpointStage::PreInsert,
            planned.len() as i64,
            known_duplicates as i64,
        )?;

        let mut imported = 0i64;
        let mut raced_duplicates = 0i64;
        for (row, key) in &planned {
            match insert_import_transaction(&tx, ctx.account_id, ctx.import_id, row, key)? {
                InsertOutcome::Inserted(_) => imported += 1,
                InsertOutcome::Duplicate => raced_duplicates += 1,
            }
        }

        let duplicates = known_duplicates as i64 + raced_duplicates;
        let failed = input.failed_rows as i64;
        let counts = ImportCounts {
            total: imported + failed,
            imported,
            failed,
            duplicates,
        };
        let every_row_failed = failed > 0 && imported == 0 && duplicates == 0;

        // A statement with nothing usable never moves the account balance
        let mut ambiguous_balance = false;
        metadata.opening_balance = input.balances.opening;
        if !every_row_failed {
            let statement_total: f64 = input.transactions.iter().map(|(_, t)| t.amount).sum();
            let reconciliation = BalanceReconciler::with_tolerance(self.reconciler_tolerance)
                .reconcile(
                    &tx,
                    &ReconcileRequest {
                        account_id: ctx.account_id,
                        import_id: ctx.import_id,
                        opening_balance: input.balances.opening,
                        extracted_balance: input.balances.closing,
                        source: input.balances.source,
                        statement_date: input.statement_date,
                        statement_total,
                    },
                )?;
            reconciliation.record(&mut metadata);
            ambiguous_balance = reconciliation.ambiguous;
        }

        let mut reasons = Vec::new();
        if failed > 0 && (imported > 0 || duplicates > 0) {
            reasons.push(REVIEW_ROW_FAILURES.to_string());
        }
        if ambiguous_balance {
            reasons.push(REVIEW_AMBIGUOUS_BALANCE.to_string());
        }
        if !metadata.possible_duplicates.is_empty() {
            reasons.push(REVIEW_POSSIBLE_DUPLICATES.to_string());
        }
        if input.extracted_rows == 0 {
            reasons.push(REVIEW_EMPTY_EXTRACTION.to_string());
        }

        let status = terminal_status(every_row_failed, &reasons);
        if status == ImportStatus::Failed {
            metadata.error = Some("every extracted row failed validation".to_string());
        } else {
            metadata.review_reasons = reasons;
        }

        for r in &metadata.reclassifications {
            insert_audit(
                &tx,
                PIPELINE_ACTOR,
                "reclassify",
                Some(IMPORT_ENTITY),
                Some(ctx.import_id),
                Some(&ctx.audit_details(json!(r))),
            )?;
        }
        for c in &metadata.sign_corrections {
            insert_audit(
                &tx,
                PIPELINE_ACTOR,
                "sign_correction",
                Some(IMPORT_ENTITY),
                Some(ctx.import_id),
                Some(&ctx.audit_details(json!(c))),
            )?;
        }

        write_counts(&tx, ctx.import_id, counts)?;
        write_metadata(&tx, ctx.import_id, &metadata)?;
        if !swap_status(&tx, ctx.import_id, ImportStatus::Processing, status)? {
            return Err(Error::Conflict(format!(
                "import {} changed status during finalize",
                ctx.import_id
            )));
        }
        insert_checkpoint(
            &tx,
            ctx.import_id,
            &ctx.correlation_id,
            CheckpointStage::PostInsert,
            imported,
            raced_duplicates,
        )?;
        insert_audit(
            &tx,
            PIPELINE_ACTOR,
            "import_finalized",
            Some(IMPORT_ENTITY),
            Some(ctx.import_id),
            Some(&ctx.audit_details(json!({
                "status": status.as_str(),
                "imported": imported,
                "failed": failed,
                "duplicates": duplicates,
            }))),
        )?;

        tx.commit()?;

        info!(
            status = %status,
            total = counts.total,
            imported,
            failed,
            duplicates,
            balance_updated = metadata.balance_updated.unwrap_or(false),
            "Import finalized"
        );

        require_import(&conn, ctx.import_id)
    }

    /// Mark a run as failed with a reason
    pub fn fail(
        &self,
        ctx: &ImportContext,
        reason: &str,
        metadata: ImportMetadata,
        counts: (usize, usize),
    ) -> Result<StatementImport> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let import = require_import(&tx, ctx.import_id)?;
        if import.status != ImportStatus::Processing {
            drop(tx);
            return require_import(&conn, ctx.import_id);
        }

        let (total, failed) = counts;
        let mut metadata = metadata;
        metadata.correlation_id = Some(ctx.correlation_id.clone());
        metadata.error = Some(reason.to_string());

        write_counts(
            &tx,
            ctx.import_id,
            ImportCounts {
                total: total as i64,
                imported: 0,
                failed: failed as i64,
                duplicates: 0,
            },
        )?;
        write_metadata(&tx, ctx.import_id, &metadata)?;
        swap_status(&tx, ctx.import_id, ImportStatus::Processing, ImportStatus::Failed)?;
        insert_audit(
            &tx,
            PIPELINE_ACTOR,
            "import_failed",
            Some(IMPORT_ENTITY),
            Some(ctx.import_id),
            Some(&ctx.audit_details(json!({ "reason": reason }))),
        )?;
        tx.commit()?;

        warn!(reason, "Import failed");
        require_import(&conn, ctx.import_id)
    }

    /// Cancel a pending or processing import. Terminal imports are returned unchanged.
    pub fn cancel(&self, import_id: i64, actor: &str) -> Result<StatementImport> {
        let conn = self.db.conn()?;
        let import = require_import(&conn, import_id)?;

        if import.status.is_terminal() {
            debug!(import_id, status = %import.status, "Cancel ignored for terminal import");
            return Ok(import);
        }

        if swap_status(&conn, import_id, import.status, ImportStatus::Cancelled)? {
            insert_audit(
                &conn,
                actor,
                "import_cancelled",
                Some(IMPORT_ENTITY),
                Some(import_id),
                Some(&json!({ "correlationId": import.correlation_id }).to_string()),
            )?;
            info!(import_id, actor, "Import cancelled");
        }

        require_import(&conn, import_id)
    }

    /// Count decreases between consecutive checkpoints that no failure or
    /// duplicate accounts for. A retried run restarts the comparison.
    pub fn unexplained_drops(&self, import_id: i64) -> Result<Vec<CountRegression>> {
        let checkpoints = self.db.list_checkpoints(import_id)?;
        let mut regressions = Vec::new();

        for pair in checkpoints.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if cur.stage <= prev.stage {
                continue;
            }
            let lost = prev.transaction_count - cur.transaction_count;
            let unexplained = lost - cur.accounted_drops;
            if lost > 0 && unexplained > 0 {
                regressions.push(CountRegression {
                    from_stage: prev.stage,
                    to_stage: cur.stage,
                    previous_count: prev.transaction_count,
                    count: cur.transaction_count,
                    unexplained,
                });
            }
        }

        Ok(regressions)
    }
}
