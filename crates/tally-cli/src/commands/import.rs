//! Import command implementations (import, process, imports, show, cancel, purge)

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::db::Database;
use tally_core::models::{ImportOutcome, ImportStatus, StatementImport};
use tally_core::purge::{purge_import, PurgeReport};
use tally_core::{ImportPipeline, ImportStateMachine};

use super::truncate;

/// Upload a statement file, then process it unless `process` is false.
/// Returns the import ID.
pub async fn cmd_import(
    pipeline: &ImportPipeline,
    user_id: &str,
    file: &Path,
    account_id: i64,
    process: bool,
) -> Result<i64> {
    let data =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("statement");

    println!("📥 Uploading {} to account #{}...", file_name, account_id);
    let import = pipeline
        .upload(user_id, account_id, file_name, data)
        .await
        .context("Upload failed")?;
    pipeline.db().log_audit(
        user_id,
        "upload",
        Some("statement_import"),
        Some(import.id),
        Some(&format!("file={}, source=cli", import.file_name)),
    )?;
    println!(
        "   Import #{} created (correlation {})",
        import.id, import.correlation_id
    );

    if process {
        cmd_process(pipeline, user_id, import.id).await?;
    } else {
        println!("   Left pending. Run it with: tally process {}", import.id);
    }

    Ok(import.id)
}

/// Run a pending import to a terminal status
pub async fn cmd_process(
    pipeline: &ImportPipeline,
    user_id: &str,
    import_id: i64,
) -> Result<ImportOutcome> {
    println!("⚙️  Processing import #{}...", import_id);
    let outcome = pipeline
        .process(import_id, user_id)
        .await
        .with_context(|| format!("Failed to process import {}", import_id))?;

    let icon = match outcome.status {
        ImportStatus::Completed => "✅",
        ImportStatus::Review => "🔎",
        ImportStatus::Cancelled => "⏹️ ",
        _ => "❌",
    };
    println!();
    println!("{} Import #{}: {}", icon, import_id, outcome.status);
    println!("   Total:      {}", outcome.total_transactions);
    println!("   Imported:   {}", outcome.imported_transactions);
    println!("   Failed:     {}", outcome.failed_transactions);
    println!("   Duplicates: {}", outcome.duplicate_transactions);

    if let Some(import) = pipeline.db().get_statement_import(import_id)? {
        if !import.metadata.review_reasons.is_empty() {
            println!(
                "   Review:     {}",
                import.metadata.review_reasons.join(", ")
            );
        }
        if let Some(ref error) = import.metadata.error {
            println!("   Error:      {}", error);
        }
    }

    Ok(outcome)
}

pub fn cmd_imports_list(db: &Database, user_id: &str, limit: i64) -> Result<()> {
    let imports = db.list_statement_imports(user_id, limit.max(1))?;

    if imports.is_empty() {
        println!("No imports for {}.", user_id);
        return Ok(());
    }

    println!();
    println!(
        "   {:>5}  {:<28} {:<11} {:>6} {:>8} {:>6} {:>5}  Created",
        "ID", "File", "Status", "Total", "Imported", "Failed", "Dups"
    );
    println!("   ──────────────────────────────────────────────────────────────────────────────────");
    for import in &imports {
        println!(
            "   {:>5}  {:<28} {:<11} {:>6} {:>8} {:>6} {:>5}  {}",
            import.id,
            truncate(&import.file_name, 28),
            import.status.as_str(),
            import.total_transactions,
            import.imported_transactions,
            import.failed_transactions,
            import.duplicate_transactions,
            import.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!();

    Ok(())
}

fn require_import(db: &Database, import_id: i64) -> Result<StatementImport> {
    db.get_statement_import(import_id)?
        .with_context(|| format!("Import {} not found", import_id))
}

pub fn cmd_show(db: &Database, import_id: i64) -> Result<()> {
    let import = require_import(db, import_id)?;
    let meta = &import.metadata;

    println!();
    println!("📄 Import #{} - {}", import.id, import.file_name);
    println!("   ─────────────────────────────────────────────────────────────");
    println!("   Status:       {}", import.status);
    println!("   Account:      #{}", import.account_id);
    println!("   Correlation:  {}", import.correlation_id);
    if let Some(ref method) = import.parsing_method {
        println!("   Parsed by:    {}", method.as_str());
    }
    println!(
        "   Counts:       {} total, {} imported, {} failed, {} duplicates",
        import.total_transactions,
        import.imported_transactions,
        import.failed_transactions,
        import.duplicate_transactions
    );
    if let Some(ref bank) = meta.bank_name {
        println!("   Bank:         {}", bank);
    }
    if let Some(ref number) = meta.account_number {
        println!("   Account no.:  ****{}", number);
    }
    if let Some(ref period) = meta.statement_period {
        let fmt = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "?".into());
        println!("   Period:       {} to {}", fmt(period.start), fmt(period.end));
    }
    if let Some(balance) = meta.extracted_balance {
        let source = meta.balance_source.as_ref().map(|s| s.as_str()).unwrap_or("unknown");
        let applied = if meta.balance_updated == Some(true) {
            "applied"
        } else {
            "not applied"
        };
        println!("   Balance:      {:.2} ({}, {})", balance, source, applied);
    }
    if let Some(drift) = meta.balance_drift {
        if drift.abs() >= 0.01 {
            println!("   ⚠️  Drift:     {:.2}", drift);
        }
    }
    if !meta.reclassifications.is_empty() {
        println!("   Reclassified: {} row(s)", meta.reclassifications.len());
    }
    if !meta.sign_corrections.is_empty() {
        println!("   Sign fixes:   {} row(s)", meta.sign_corrections.len());
    }
    for row_error in &meta.row_errors {
        println!("   Row {}: {}", row_error.row_index, row_error.reason);
    }
    for dup in &meta.possible_duplicates {
        println!(
            "   Possible duplicate: row {} {} {:.2} (matches #{})",
            dup.row_index, dup.description, dup.amount, dup.existing_transaction_id
        );
    }
    if !meta.review_reasons.is_empty() {
        println!("   Review:       {}", meta.review_reasons.join(", "));
    }
    if let Some(ref error) = meta.error {
        println!("   Error:        {}", error);
    }
    if !meta.integrity_flags.is_empty() {
        println!("   Flags:        {}", meta.integrity_flags.join(", "));
    }

    let checkpoints = db.list_checkpoints(import_id)?;
    if !checkpoints.is_empty() {
        println!();
        println!("   Checkpoints:");
        for cp in &checkpoints {
            println!(
                "     {:<20} {:>5} rows  ({} dropped)",
                cp.stage.as_str(),
                cp.transaction_count,
                cp.accounted_drops
            );
        }
    }

    let drops = ImportStateMachine::new(db.clone()).unexplained_drops(import_id)?;
    for drop in &drops {
        println!(
            "   ❗ {} -> {}: {} row(s) unaccounted for",
            drop.from_stage.as_str(),
            drop.to_stage.as_str(),
            drop.unexplained
        );
    }
    println!();

    Ok(())
}

pub fn cmd_cancel(db: &Database, import_id: i64, actor: &str) -> Result<()> {
    require_import(db, import_id)?;
    let import = ImportStateMachine::new(db.clone())
        .cancel(import_id, actor)
        .with_context(|| format!("Failed to cancel import {}", import_id))?;

    if import.status == ImportStatus::Cancelled {
        println!("⏹️  Import #{} cancelled", import_id);
    } else {
        println!(
            "Import #{} already finished ({}), nothing to cancel",
            import_id, import.status
        );
    }
    Ok(())
}

pub fn cmd_purge(db: &Database, import_id: i64, reason: &str, actor: &str) -> Result<PurgeReport> {
    let reason = reason.trim();
    if reason.is_empty() {
        anyhow::bail!("A purge reason is required");
    }

    let report = purge_import(db, import_id, reason, actor)
        .with_context(|| format!("Failed to purge import {}", import_id))?;

    println!("🧹 Purged import #{}", import_id);
    println!("   Transactions deleted: {}", report.transactions_deleted);
    println!("   OCR cache entries:    {}", report.ocr_results_deleted);
    match report.balance_restored {
        Some(balance) => println!("   Balance restored to:  {:.2}", balance),
        None => println!("   Balance:              unchanged"),
    }
    if !report.flagged_imports.is_empty() {
        let ids: Vec<String> = report
            .flagged_imports
            .iter()
            .map(|id| format!("#{}", id))
            .collect();
        println!("   Flagged for review:   {}", ids.join(", "));
    }

    Ok(report)
}
