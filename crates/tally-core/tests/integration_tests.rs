//! Integration tests for tally-core
//!
//! These tests exercise the full upload → process → ledger workflow against
//! a throwaway database, a temp-dir object store and mock OCR/extractor
//! backends.

use std::sync::Arc;

use serde_json::{json, Value};
use tally_core::{
    db::Database,
    error::Error,
    extract::{ExtractorClient, MockExtractor},
    models::{CheckpointStage, ImportStatus, NewStatementImport, ParsingMethod, TransactionType},
    normalize::Normalizer,
    ocr::{MockOcrEngine, OcrClient},
    pipeline::ImportPipeline,
    purge::purge_import,
    storage::{LocalObjectStore, ObjectStore},
};
use tempfile::TempDir;

const USER: &str = "user-1";

struct Harness {
    db: Database,
    pipeline: ImportPipeline,
    ocr: MockOcrEngine,
    extractor: MockExtractor,
    account_id: i64,
    _dir: TempDir,
}

fn harness_with(ocr: MockOcrEngine, extractor: MockExtractor) -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = Database::in_memory().expect("Failed to create in-memory database");
    let account_id = db.create_account(USER, "Checking", 0.0).unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));

    let pipeline = ImportPipeline::new(
        db.clone(),
        OcrClient::Mock(ocr.clone()),
        ExtractorClient::Mock(extractor.clone()),
        store,
        Normalizer::default(),
    );

    Harness {
        db,
        pipeline,
        ocr,
        extractor,
        account_id,
        _dir: dir,
    }
}

/// Mock OCR echoes the file bytes and the mock extractor parses them as JSON,
/// so a JSON "PDF" drives the full OCR + extractor path.
fn harness() -> Harness {
    harness_with(MockOcrEngine::new(), MockExtractor::new())
}

fn row(day: u32, description: &str, amount: f64, label: &str) -> Value {
    json!({
        "date": format!("2024-03-{:02}", day),
        "description": description,
        "amount": amount,
        "type": label,
    })
}

/// `n` distinct purchases of 1.00, 2.00, ... with a matching closing balance
fn clean_statement(n: usize) -> Value {
    let rows: Vec<Value> = (0..n)
        .map(|i| row((i % 28) as u32 + 1, &format!("MERCHANT {:02}", i), -((i + 1) as f64), "debit"))
        .collect();
    let total: f64 = (1..=n).map(|i| i as f64).sum();

    json!({
        "bankName": "First Example Bank",
        "accountNumber": "0000-1111-2222-3456",
        "statementPeriod": { "start": "2024-03-01", "end": "2024-03-31" },
        "balances": { "opening": 1000.0, "closing": 1000.0 - total, "source": "closing_balance_line" },
        "transactions": rows,
    })
}

async fn upload_json(h: &Harness, name: &str, document: &Value) -> i64 {
    h.pipeline
        .upload(USER, h.account_id, name, document.to_string().into_bytes())
        .await
        .unwrap()
        .id
}

// =============================================================================
// End-to-end imports
// =============================================================================

#[tokio::test]
async fn test_clean_statement_completes() {
    let h = harness();
    let import_id = upload_json(&h, "march.pdf", &clean_statement(43)).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.status, ImportStatus::Completed);
    assert_eq!(outcome.total_transactions, 43);
    assert_eq!(outcome.imported_transactions, 43);
    assert_eq!(outcome.failed_transactions, 0);
    assert_eq!(outcome.duplicate_transactions, 0);

    let import = h.db.get_statement_import(import_id).unwrap().unwrap();
    assert_eq!(import.parsing_method, Some(ParsingMethod::Llm));
    assert_eq!(import.metadata.account_number.as_deref(), Some("3456"));
    assert_eq!(import.metadata.bank_name.as_deref(), Some("First Example Bank"));
    assert_eq!(import.metadata.ocr_cache_hit, Some(false));
    assert_eq!(import.metadata.balance_updated, Some(true));
    assert_eq!(import.metadata.balance_drift, Some(0.0));
    assert!(import.metadata.review_reasons.is_empty());

    let account = h.db.get_account(h.account_id).unwrap().unwrap();
    assert_eq!(account.balance, 54.0);
    assert_eq!(account.balance_import_id, Some(import_id));

    assert!(h
        .pipeline
        .state_machine()
        .unexplained_drops(import_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_deposit_reclassified_and_audited() {
    let h = harness();
    let document = json!({
        "transactions": [
            row(2, "MOBILE DEPOSIT REF 123", 250.0, "debit"),
            row(3, "GROCERY MART", -42.1, "debit"),
        ]
    });
    let import_id = upload_json(&h, "march.pdf", &document).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.imported_transactions, 2);

    let rows = h.db.list_import_transactions(import_id).unwrap();
    let deposit = rows
        .iter()
        .find(|t| t.description.contains("DEPOSIT"))
        .unwrap();
    assert_eq!(deposit.transaction_type, TransactionType::Income);
    assert_eq!(deposit.amount, 250.0);

    let import = h.db.get_statement_import(import_id).unwrap().unwrap();
    assert_eq!(import.metadata.reclassifications.len(), 1);
    assert_eq!(import.metadata.reclassifications[0].matched_phrase, "DEPOSIT");

    let audit = h.db.list_audit_for_entity("statement_import", import_id).unwrap();
    let entry = audit.iter().find(|e| e.action == "reclassify").unwrap();
    let details: Value = serde_json::from_str(entry.details.as_deref().unwrap()).unwrap();
    assert_eq!(details["correlationId"], import.correlation_id.as_str());
}

#[tokio::test]
async fn test_same_file_twice_reuses_cache_and_ledger() {
    let h = harness();
    let document = clean_statement(10);

    let first = upload_json(&h, "march.pdf", &document).await;
    h.pipeline.process(first, USER).await.unwrap();

    let second = upload_json(&h, "march-again.pdf", &document).await;
    let outcome = h.pipeline.process(second, USER).await.unwrap();

    assert_eq!(outcome.status, ImportStatus::Completed);
    assert_eq!(outcome.imported_transactions, 0);
    assert_eq!(outcome.duplicate_transactions, 10);
    assert_eq!(h.db.count_account_transactions(h.account_id).unwrap(), 10);

    assert_eq!(h.ocr.calls(), 1);
    assert_eq!(h.extractor.calls(), 1);

    let import = h.db.get_statement_import(second).unwrap().unwrap();
    let file_hash = import.file_hash.unwrap();
    assert_eq!(h.db.count_ocr_results(&file_hash).unwrap(), 1);
    assert_eq!(import.metadata.ocr_cache_hit, Some(true));
    assert_eq!(import.metadata.extraction_cache_hit, Some(true));
    // Same statement date as the balance already applied
    assert_eq!(import.metadata.balance_updated, Some(false));
}

#[tokio::test]
async fn test_identical_rows_within_statement_both_persist() {
    let h = harness();
    let document = json!({
        "transactions": [
            row(4, "COFFEE CORNER", -3.75, "debit"),
            row(4, "COFFEE CORNER", -3.75, "debit"),
        ]
    });
    let import_id = upload_json(&h, "march.pdf", &document).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.imported_transactions, 2);
    assert_eq!(outcome.duplicate_transactions, 0);
}

#[tokio::test]
async fn test_extractor_failure_fails_import() {
    let h = harness_with(MockOcrEngine::new(), MockExtractor::failing());
    let import_id = upload_json(&h, "march.pdf", &clean_statement(3)).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status, ImportStatus::Failed);
    assert_eq!(outcome.imported_transactions, 0);

    let import = h.db.get_statement_import(import_id).unwrap().unwrap();
    assert!(import
        .metadata
        .error
        .as_deref()
        .unwrap()
        .starts_with("Extraction failed"));
    assert_eq!(h.db.count_account_transactions(h.account_id).unwrap(), 0);

    // Nothing cached for a failed extraction
    let file_hash = import.file_hash.unwrap_or_default();
    let cached = h.db.get_ocr_result(&file_hash).unwrap();
    assert!(cached.map(|c| c.structured_data.is_none()).unwrap_or(true));
}

#[tokio::test]
async fn test_ocr_failure_fails_import() {
    let h = harness_with(MockOcrEngine::failing(), MockExtractor::new());
    let import_id = upload_json(&h, "march.pdf", &clean_statement(3)).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Failed);
    assert_eq!(h.extractor.calls(), 0);
}

#[tokio::test]
async fn test_counts_are_conserved_with_bad_rows() {
    let h = harness();
    let document = json!({
        "transactions": [
            row(1, "HARDWARE STORE", -20.0, "debit"),
            row(2, "BOOKSHOP", -15.0, "debit"),
            { "date": "2024-03-03", "description": "NO AMOUNT" },
            { "description": "NO DATE", "amount": -1.0 },
            row(5, "ZERO", 0.0, "debit"),
        ]
    });
    let import_id = upload_json(&h, "march.pdf", &document).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Review);
    assert_eq!(outcome.imported_transactions, 2);
    assert_eq!(outcome.failed_transactions, 3);
    assert_eq!(
        outcome.total_transactions,
        outcome.imported_transactions + outcome.failed_transactions
    );

    let import = h.db.get_statement_import(import_id).unwrap().unwrap();
    assert_eq!(import.metadata.review_reasons, vec!["row_failures".to_string()]);
    let indexes: Vec<usize> = import.metadata.row_errors.iter().map(|e| e.row_index).collect();
    assert_eq!(indexes, vec![2, 3, 4]);

    assert!(h
        .pipeline
        .state_machine()
        .unexplained_drops(import_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_every_row_failing_fails_import() {
    let h = harness();
    let document = json!({
        "balances": { "closing": 999.0, "source": "closing_balance_line" },
        "transactions": [{ "description": "NO DATE", "amount": -1.0 }]
    });
    let import_id = upload_json(&h, "march.pdf", &document).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Failed);
    assert_eq!(outcome.failed_transactions, 1);

    let account = h.db.get_account(h.account_id).unwrap().unwrap();
    assert_eq!(account.balance, 0.0);
}

#[tokio::test]
async fn test_empty_statement_goes_to_review() {
    let h = harness();
    let import_id = upload_json(&h, "march.pdf", &json!({ "transactions": [] })).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Review);
    assert_eq!(outcome.total_transactions, 0);
}

#[tokio::test]
async fn test_inferred_balance_goes_to_review() {
    let h = harness();
    let document = json!({
        "balances": { "closing": 500.0, "source": "inferred" },
        "transactions": [row(7, "PHARMACY", -9.99, "debit")]
    });
    let import_id = upload_json(&h, "march.pdf", &document).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Review);

    let import = h.db.get_statement_import(import_id).unwrap().unwrap();
    assert!(import
        .metadata
        .review_reasons
        .contains(&"ambiguous_balance".to_string()));
    assert_eq!(h.db.get_account(h.account_id).unwrap().unwrap().balance, 0.0);
}

#[tokio::test]
async fn test_unrecognized_balance_source_goes_to_review() {
    let h = harness();
    let document = json!({
        "balances": { "closing": 5.0, "source": "explicit" },
        "transactions": [row(8, "NEWSAGENT", -2.5, "debit")]
    });
    let import_id = upload_json(&h, "march.pdf", &document).await;

    let outcome = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Review);
    assert_eq!(outcome.imported_transactions, 1);

    let import = h.db.get_statement_import(import_id).unwrap().unwrap();
    assert_eq!(import.metadata.balance_updated, Some(false));
    assert!(import
        .metadata
        .review_reasons
        .contains(&"ambiguous_balance".to_string()));
}

#[tokio::test]
async fn test_overlapping_statements_flag_possible_duplicate() {
    let h = harness();
    let first = json!({
        "transactions": [
            row(4, "COFFEE CORNER", -3.75, "debit"),
            row(5, "BOOKSHOP", -12.0, "debit"),
        ]
    });
    let first_id = upload_json(&h, "march-week1.pdf", &first).await;
    let outcome = h.pipeline.process(first_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Completed);

    // Second export overlaps the first and shows two coffees on the 4th
    let second = json!({
        "transactions": [
            row(4, "Coffee Corner", -3.75, "debit"),
            row(4, "COFFEE CORNER", -3.75, "debit"),
            row(6, "RENT", -900.0, "debit"),
        ]
    });
    let second_id = upload_json(&h, "march-full.pdf", &second).await;
    let outcome = h.pipeline.process(second_id, USER).await.unwrap();

    assert_eq!(outcome.status, ImportStatus::Review);
    assert_eq!(outcome.imported_transactions, 2);
    assert_eq!(outcome.duplicate_transactions, 1);
    assert_eq!(outcome.failed_transactions, 0);
    assert_eq!(h.db.count_account_transactions(h.account_id).unwrap(), 4);

    let import = h.db.get_statement_import(second_id).unwrap().unwrap();
    assert_eq!(
        import.metadata.review_reasons,
        vec!["possible_duplicates".to_string()]
    );
    assert_eq!(import.metadata.possible_duplicates.len(), 1);
    let flagged = &import.metadata.possible_duplicates[0];
    assert_eq!(flagged.row_index, 1);
    assert_eq!(flagged.amount, -3.75);

    let original = h.db.list_import_transactions(first_id).unwrap();
    assert_eq!(flagged.existing_transaction_id, original[0].id);
}

// =============================================================================
// Parsing paths
// =============================================================================

#[tokio::test]
async fn test_csv_statement_is_deterministic() {
    let h = harness();
    let csv = "Date,Description,Debit,Credit\n\
               03/01/2024,ELECTRIC UTILITY,82.10,\n\
               03/02/2024,PAYROLL,,2100.00\n";

    let import = h
        .pipeline
        .upload(USER, h.account_id, "march.csv", csv.as_bytes().to_vec())
        .await
        .unwrap();
    let outcome = h.pipeline.process(import.id, USER).await.unwrap();

    assert_eq!(outcome.status, ImportStatus::Completed);
    assert_eq!(outcome.imported_transactions, 2);
    assert_eq!(h.ocr.calls(), 0);
    assert_eq!(h.extractor.calls(), 0);

    let import = h.db.get_statement_import(import.id).unwrap().unwrap();
    assert_eq!(import.parsing_method, Some(ParsingMethod::Deterministic));

    let rows = h.db.list_import_transactions(import.id).unwrap();
    assert_eq!(rows[0].amount, -82.10);
    assert_eq!(rows[1].amount, 2100.0);
}

#[tokio::test]
async fn test_csv_with_zero_filled_columns_keeps_credits() {
    let h = harness();
    let csv = "Date,Description,Debit,Credit\n\
               03/01/2024,COFFEE,4.50,0.00\n\
               03/02/2024,PAYROLL,0.00,2500.00\n";

    let import = h
        .pipeline
        .upload(USER, h.account_id, "march.csv", csv.as_bytes().to_vec())
        .await
        .unwrap();
    let outcome = h.pipeline.process(import.id, USER).await.unwrap();

    assert_eq!(outcome.status, ImportStatus::Completed);
    assert_eq!(outcome.imported_transactions, 2);
    assert_eq!(outcome.failed_transactions, 0);

    let rows = h.db.list_import_transactions(import.id).unwrap();
    assert_eq!(rows[0].amount, -4.5);
    assert_eq!(rows[1].amount, 2500.0);
    assert_eq!(rows[1].transaction_type, TransactionType::Income);

    // No OCR stage on the CSV path
    let checkpoints = h.db.list_checkpoints(import.id).unwrap();
    assert_eq!(checkpoints[0].stage, CheckpointStage::ExtractionDone);
    assert!(checkpoints.iter().all(|c| c.stage != CheckpointStage::OcrDone));
    assert!(h
        .pipeline
        .state_machine()
        .unexplained_drops(import.id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_undecodable_csv_fails_import() {
    let h = harness();
    let mut csv = b"Date,Description,Amount\n03/01/2024,CAF".to_vec();
    csv.extend_from_slice(&[0xFF, 0xFE]);
    csv.extend_from_slice(b" BAR,-4.50\n");

    let import = h
        .pipeline
        .upload(USER, h.account_id, "march.csv", csv)
        .await
        .unwrap();
    let outcome = h.pipeline.process(import.id, USER).await.unwrap();

    assert_eq!(outcome.status, ImportStatus::Failed);
    assert_eq!(outcome.imported_transactions, 0);
    assert_eq!(h.ocr.calls(), 0);

    let failed = h.db.get_statement_import(import.id).unwrap().unwrap();
    assert!(failed
        .metadata
        .error
        .as_deref()
        .unwrap()
        .starts_with("CSV parse failed"));
    assert_eq!(h.db.count_account_transactions(h.account_id).unwrap(), 0);

    // Retrying returns the recorded outcome
    let again = h.pipeline.process(import.id, USER).await.unwrap();
    assert_eq!(again, outcome);
}

#[tokio::test]
async fn test_ocr_table_skips_extractor() {
    let markdown = "# Statement\n\n\
                    Opening balance 100.00\n\n\
                    | Date | Description | Amount |\n\
                    |------|-------------|--------|\n\
                    | 03/04/2024 | BAKERY | -12.00 |\n\
                    | 03/05/2024 | BOOKSHOP | -8.00 |\n\n\
                    Closing balance 80.00\n";
    let h = harness_with(MockOcrEngine::with_output(markdown, 2), MockExtractor::new());

    let import = h
        .pipeline
        .upload(USER, h.account_id, "scan.pdf", b"%PDF-1.7".to_vec())
        .await
        .unwrap();
    let outcome = h.pipeline.process(import.id, USER).await.unwrap();

    assert_eq!(outcome.status, ImportStatus::Completed);
    assert_eq!(outcome.imported_transactions, 2);
    assert_eq!(h.extractor.calls(), 0);

    let import = h.db.get_statement_import(import.id).unwrap().unwrap();
    assert_eq!(import.parsing_method, Some(ParsingMethod::Ocr));
    assert_eq!(import.metadata.page_count, Some(2));
    assert_eq!(h.db.get_account(h.account_id).unwrap().unwrap().balance, 80.0);
}

// =============================================================================
// Access and lifecycle edges
// =============================================================================

#[tokio::test]
async fn test_missing_file_leaves_import_pending() {
    let h = harness();
    let import = h
        .db
        .create_statement_import(&NewStatementImport {
            user_id: USER.into(),
            account_id: h.account_id,
            file_name: "lost.pdf".into(),
            file_path: format!("{}/{}/lost.pdf", USER, h.account_id),
            file_hash: None,
        })
        .unwrap();

    let err = h.pipeline.process(import.id, USER).await.unwrap_err();
    assert!(matches!(err, Error::FileNotInStorage(_)));

    let import = h.db.get_statement_import(import.id).unwrap().unwrap();
    assert_eq!(import.status, ImportStatus::Pending);
}

#[tokio::test]
async fn test_other_user_cannot_process() {
    let h = harness();
    let import_id = upload_json(&h, "march.pdf", &clean_statement(1)).await;

    let err = h.pipeline.process(import_id, "intruder").await.unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
    assert!(matches!(
        h.pipeline.process(9999, USER).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_finished_import_is_not_reprocessed() {
    let h = harness();
    let import_id = upload_json(&h, "march.pdf", &clean_statement(2)).await;

    let first = h.pipeline.process(import_id, USER).await.unwrap();
    let second = h.pipeline.process(import_id, USER).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.ocr.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_import_is_not_processed() {
    let h = harness();
    let import_id = upload_json(&h, "march.pdf", &clean_statement(2)).await;

    h.pipeline.state_machine().cancel(import_id, USER).unwrap();
    let outcome = h.pipeline.process(import_id, USER).await.unwrap();

    assert_eq!(outcome.status, ImportStatus::Cancelled);
    assert!(!outcome.success);
    assert_eq!(h.ocr.calls(), 0);
}

// =============================================================================
// Integrity purge
// =============================================================================

#[tokio::test]
async fn test_purge_rolls_back_import() {
    let h = harness();
    let document = clean_statement(5);
    let import_id = upload_json(&h, "march.pdf", &document).await;
    h.pipeline.process(import_id, USER).await.unwrap();

    let other_id = upload_json(&h, "copy.pdf", &document).await;
    h.pipeline.process(other_id, USER).await.unwrap();
    assert_eq!(h.db.get_account(h.account_id).unwrap().unwrap().balance, 985.0);

    let report = purge_import(&h.db, import_id, "OCR misread amounts", "operator").unwrap();
    assert_eq!(report.transactions_deleted, 5);
    assert_eq!(report.ocr_results_deleted, 1);
    assert_eq!(report.balance_restored, Some(0.0));
    assert_eq!(report.flagged_imports, vec![other_id]);

    assert_eq!(h.db.count_account_transactions(h.account_id).unwrap(), 0);
    let account = h.db.get_account(h.account_id).unwrap().unwrap();
    assert_eq!(account.balance, 0.0);
    assert!(account.balance_import_id.is_none());

    let purged = h.db.get_statement_import(import_id).unwrap().unwrap();
    assert_eq!(purged.status, ImportStatus::Failed);
    assert!(purged.metadata.integrity_flags.contains(&"purged".to_string()));

    let other = h.db.get_statement_import(other_id).unwrap().unwrap();
    assert!(other
        .metadata
        .integrity_flags
        .contains(&"ocr_cache_purged".to_string()));

    // A fresh upload of the same bytes runs OCR again
    let again = upload_json(&h, "march-rescan.pdf", &document).await;
    let outcome = h.pipeline.process(again, USER).await.unwrap();
    assert_eq!(outcome.imported_transactions, 5);
    assert_eq!(h.ocr.calls(), 2);
}

#[tokio::test]
async fn test_corrected_statement_applies_balance_after_purge() {
    let h = harness();
    let period = json!({ "start": "2024-03-01", "end": "2024-03-31" });
    let bad = json!({
        "statementPeriod": period,
        "balances": { "closing": 999.0, "source": "closing_balance_line" },
        "transactions": [row(3, "GROCER", -100.0, "debit")]
    });
    let bad_id = upload_json(&h, "march.pdf", &bad).await;
    h.pipeline.process(bad_id, USER).await.unwrap();
    assert_eq!(h.db.get_account(h.account_id).unwrap().unwrap().balance, 999.0);

    purge_import(&h.db, bad_id, "misread closing balance", "operator").unwrap();
    let account = h.db.get_account(h.account_id).unwrap().unwrap();
    assert_eq!(account.balance, 0.0);
    assert!(account.balance_as_of.is_none());
    assert!(account.last_updated.is_none());

    let corrected = json!({
        "statementPeriod": period,
        "balances": { "opening": 0.0, "closing": -10.0, "source": "closing_balance_line" },
        "transactions": [row(3, "GROCER", -10.0, "debit")]
    });
    let corrected_id = upload_json(&h, "march-corrected.pdf", &corrected).await;
    let outcome = h.pipeline.process(corrected_id, USER).await.unwrap();
    assert_eq!(outcome.status, ImportStatus::Completed);

    let import = h.db.get_statement_import(corrected_id).unwrap().unwrap();
    assert_eq!(import.metadata.balance_updated, Some(true));
    let account = h.db.get_account(h.account_id).unwrap().unwrap();
    assert_eq!(account.balance, -10.0);
    assert_eq!(account.balance_import_id, Some(corrected_id));
}

#[tokio::test]
async fn test_purge_restores_earlier_statement_provenance() {
    let h = harness();
    let march = json!({
        "statementPeriod": { "start": "2024-03-01", "end": "2024-03-31" },
        "balances": { "closing": 50.0, "source": "closing_balance_line" },
        "transactions": [row(3, "GROCER", -10.0, "debit")]
    });
    let march_id = upload_json(&h, "march.pdf", &march).await;
    h.pipeline.process(march_id, USER).await.unwrap();

    let april = json!({
        "statementPeriod": { "start": "2024-04-01", "end": "2024-04-30" },
        "balances": { "closing": 75.0, "source": "closing_balance_line" },
        "transactions": [{ "date": "2024-04-02", "description": "PAYROLL", "amount": 25.0, "type": "credit" }]
    });
    let april_id = upload_json(&h, "april.pdf", &april).await;
    h.pipeline.process(april_id, USER).await.unwrap();
    let before = h.db.get_account(h.account_id).unwrap().unwrap();
    assert_eq!(before.balance_import_id, Some(april_id));

    let report = purge_import(&h.db, april_id, "wrong account", "operator").unwrap();
    assert_eq!(report.balance_restored, Some(50.0));

    let account = h.db.get_account(h.account_id).unwrap().unwrap();
    assert_eq!(account.balance, 50.0);
    assert_eq!(account.balance_import_id, Some(march_id));
    assert_eq!(
        account.balance_as_of,
        chrono::NaiveDate::from_ymd_opt(2024, 3, 31)
    );
    assert!(account.last_updated.is_some());
}
