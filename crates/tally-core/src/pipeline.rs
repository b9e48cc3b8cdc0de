//! Statement import pipeline
//!
//! One call to `process` takes a pending import to a terminal status:
//!
//! 1. Confirm the caller owns the import and the file is in storage
//! 2. `pending -> processing`
//! 3. CSV files are parsed directly. Anything else goes through the OCR
//!    cache, then either the markdown table parser or the extractor.
//! 4. Validate and normalize rows
//! 5. Finalize: dedup, insert, reconcile, terminal status (one transaction)
//!
//! Extraction, OCR and CSV decoding failures end the import as `failed`.
//! Other errors (database, storage) leave it in `processing` so the caller
//! can retry.
//!
//! CSV imports never touch OCR, so their first checkpoint is
//! `extraction_done` and `unexplained_drops` starts counting there.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, Instrument};

use crate::config::TallyConfig;
use crate::context::ImportContext;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::extract::{
    parsing::validate_rows, ExtractionAdapter, ExtractionResult, ExtractorClient,
    StructuredExtractor,
};
use crate::lifecycle::{FinalizeInput, ImportStateMachine};
use crate::models::{
    CheckpointStage, ImportMetadata, ImportOutcome, NewStatementImport, ParsingMethod,
    StatementImport,
};
use crate::normalize::Normalizer;
use crate::ocr::{hash_bytes, OcrCache, OcrClient, OcrEngine};
use crate::statement_parser::{
    find_balance_lines, is_csv_file, parse_csv_statement, parse_markdown_tables,
};
use crate::storage::{authorize_key, object_key, LocalObjectStore, ObjectStore};

/// Keep only the last four digits of an account number
pub fn mask_account_number(raw: &str) -> Option<String> {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let start = digits.len().saturating_sub(4);
    Some(digits[start..].iter().collect())
}

/// Document produced by whichever parsing path ran
struct ParsedDocument {
    result: ExtractionResult,
    method: ParsingMethod,
    ocr_cache_hit: Option<bool>,
    extraction_cache_hit: Option<bool>,
    page_count: Option<i64>,
}

enum Parse {
    Parsed(ParsedDocument),
    /// OCR or extraction failed; the import must fail with this reason
    Failed(String, ImportMetadata),
}

#[derive(Clone)]
pub struct ImportPipeline {
    db: Database,
    ocr: OcrClient,
    cache: OcrCache,
    adapter: ExtractionAdapter,
    store: Arc<dyn ObjectStore>,
    state: ImportStateMachine,
    normalizer: Normalizer,
}

impl ImportPipeline {
    pub fn new(
        db: Database,
        ocr: OcrClient,
        extractor: ExtractorClient,
        store: Arc<dyn ObjectStore>,
        normalizer: Normalizer,
    ) -> Self {
        let cache = OcrCache::new(db.clone());
        Self {
            adapter: ExtractionAdapter::new(extractor, cache.clone()),
            state: ImportStateMachine::new(db.clone()),
            db,
            ocr,
            cache,
            store,
            normalizer,
        }
    }

    /// Build from configuration and the OCR/extractor environment variables
    pub fn from_config(db: Database, config: &TallyConfig) -> Result<Self> {
        let ocr = OcrClient::from_env().ok_or_else(|| {
            Error::Config("OCR engine not configured (set OCR_HOST or OCR_BACKEND=mock)".into())
        })?;
        let extractor = ExtractorClient::from_env().ok_or_else(|| {
            Error::Config(
                "Extractor not configured (set OPENAI_COMPATIBLE_HOST, OLLAMA_HOST or EXTRACTOR_BACKEND=mock)"
                    .into(),
            )
        })?;
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.storage_dir));
        info!(
            ocr = ocr.host(),
            extractor = extractor.host(),
            storage_dir = %config.storage_dir.display(),
            "Import pipeline configured"
        );
        Ok(Self::new(db, ocr, extractor, store, config.normalizer()?))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn state_machine(&self) -> &ImportStateMachine {
        &self.state
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Store an uploaded statement and create its pending import
    pub async fn upload(
        &self,
        user_id: &str,
        account_id: i64,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<StatementImport> {
        let account = self
            .db
            .get_account(account_id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", account_id)))?;
        if account.user_id != user_id {
            return Err(Error::Forbidden(format!(
                "account {} belongs to another user",
                account_id
            )));
        }
        if data.is_empty() {
            return Err(Error::InvalidData("uploaded file is empty".into()));
        }

        let key = object_key(user_id, account_id, file_name, Utc::now())?;
        let file_hash = hash_bytes(&data);
        self.store.put(&key, data).await?;

        let import = self.db.create_statement_import(&NewStatementImport {
            user_id: user_id.to_string(),
            account_id,
            file_name: file_name.to_string(),
            file_path: key,
            file_hash: Some(file_hash),
        })?;

        info!(
            import_id = import.id,
            correlation_id = %import.correlation_id,
            user_id,
            account_id,
            "Statement uploaded"
        );
        Ok(import)
    }

    /// Load an import the caller owns
    pub fn import_for_user(&self, import_id: i64, user_id: &str) -> Result<StatementImport> {
        let import = self
            .db
            .get_statement_import(import_id)?
            .ok_or_else(|| Error::NotFound(format!("Statement import {}", import_id)))?;
        if import.user_id != user_id {
            return Err(Error::Forbidden(format!(
                "import {} belongs to another user",
                import_id
            )));
        }
        Ok(import)
    }

    /// Run an import to a terminal status.
    ///
    /// Imports already in a terminal status return their recorded outcome.
    pub async fn process(&self, import_id: i64, user_id: &str) -> Result<ImportOutcome> {
        let import = self.import_for_user(import_id, user_id)?;
        if import.status.is_terminal() {
            info!(import_id, status = %import.status, "Import already finished");
            return Ok(import.outcome());
        }

        authorize_key(&import.file_path, user_id)?;
        if !self.store.exists(&import.file_path).await? {
            return Err(Error::FileNotInStorage(import.file_path.clone()));
        }

        let import = self.state.begin_processing(import_id)?;
        let ctx = ImportContext::for_import(&import);
        let span = ctx.span();

        self.run(&ctx, import).instrument(span).await
    }

    async fn run(&self, ctx: &ImportContext, import: StatementImport) -> Result<ImportOutcome> {
        info!(file_name = %import.file_name, "Processing statement");
        let data = self.store.get(&import.file_path).await?;
        let file_hash = hash_bytes(&data);

        let document = match self.parse(ctx, &import, &data, &file_hash).await? {
            Parse::Parsed(document) => document,
            Parse::Failed(reason, metadata) => {
                return Ok(self.state.fail(ctx, &reason, metadata, (0, 0))?.outcome());
            }
        };

        self.state.record_source(ctx, &file_hash, document.method)?;
        let result = document.result;
        self.state.record_checkpoint(
            ctx,
            CheckpointStage::ExtractionDone,
            result.transactions.len(),
            0,
        )?;

        let (valid, mut row_errors) = validate_rows(&result.transactions);
        let normalized = self.normalizer.normalize_all(&valid);
        row_errors.extend(normalized.row_errors);
        row_errors.sort_by_key(|e| e.row_index);
        self.state.record_checkpoint(
            ctx,
            CheckpointStage::NormalizationDone,
            normalized.transactions.len(),
            row_errors.len(),
        )?;

        let metadata = ImportMetadata {
            correlation_id: Some(ctx.correlation_id.clone()),
            ocr_cache_hit: document.ocr_cache_hit,
            extraction_cache_hit: document.extraction_cache_hit,
            page_count: document.page_count,
            bank_name: result.bank_name.clone(),
            account_number: result.account_number.as_deref().and_then(mask_account_number),
            statement_period: result.statement_period,
            reclassifications: normalized.reclassifications,
            sign_corrections: normalized.sign_corrections,
            inferred_type_rows: normalized.inferred_type_rows,
            row_errors: row_errors.clone(),
            ..Default::default()
        };

        let statement_date = result
            .statement_period
            .and_then(|p| p.end)
            .unwrap_or_else(|| import.created_at.date_naive());

        let finished = self.state.finalize(
            ctx,
            FinalizeInput {
                extracted_rows: result.transactions.len(),
                transactions: normalized.transactions,
                failed_rows: row_errors.len(),
                balances: result.balances,
                statement_date,
                metadata,
            },
        )?;

        Ok(finished.outcome())
    }

    async fn parse(
        &self,
        ctx: &ImportContext,
        import: &StatementImport,
        data: &[u8],
        file_hash: &str,
    ) -> Result<Parse> {
        if is_csv_file(&import.file_name) {
            match parse_csv_statement(data) {
                Ok(Some(result)) => {
                    return Ok(Parse::Parsed(ParsedDocument {
                        result,
                        method: ParsingMethod::Deterministic,
                        ocr_cache_hit: None,
                        extraction_cache_hit: None,
                        page_count: None,
                    }));
                }
                Ok(None) => info!("CSV header not recognized, falling back to OCR"),
                // Same bytes fail the same way on every retry
                Err(Error::Csv(e)) => {
                    return Ok(Parse::Failed(
                        format!("CSV parse failed: {}", e),
                        ImportMetadata::default(),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        let (entry, ocr_cache_hit) = match self.cache.get(file_hash)? {
            Some(entry) => (entry, true),
            None => {
                let output = match self.ocr.recognize(&import.file_name, data).await {
                    Ok(output) => output,
                    Err(e) => {
                        let reason = format!("OCR failed: {}", e);
                        return Ok(Parse::Failed(
                            reason,
                            ImportMetadata {
                                ocr_cache_hit: Some(false),
                                ..Default::default()
                            },
                        ));
                    }
                };
                let content_hash = hash_bytes(output.markdown.as_bytes());
                let (entry, created) = self.cache.get_or_put(
                    file_hash,
                    &content_hash,
                    &output.markdown,
                    output.page_count,
                )?;
                (entry, !created)
            }
        };
        self.state
            .record_checkpoint(ctx, CheckpointStage::OcrDone, 0, 0)?;

        let page_count = Some(entry.page_count);

        if let Some(result) = parse_markdown_tables(&entry.markdown_text) {
            return Ok(Parse::Parsed(ParsedDocument {
                result,
                method: ParsingMethod::Ocr,
                ocr_cache_hit: Some(ocr_cache_hit),
                extraction_cache_hit: None,
                page_count,
            }));
        }

        match self.adapter.extract(&entry).await {
            Ok(extraction) => {
                let mut result = extraction.result;
                if result.balances.closing.is_none() {
                    let lines = find_balance_lines(&entry.markdown_text);
                    result.balances.closing = lines.closing;
                    result.balances.source = lines.source;
                    result.balances.opening = result.balances.opening.or(lines.opening);
                }
                Ok(Parse::Parsed(ParsedDocument {
                    result,
                    method: ParsingMethod::Llm,
                    ocr_cache_hit: Some(ocr_cache_hit),
                    extraction_cache_hit: Some(extraction.cache_hit),
                    page_count,
                }))
            }
            Err(Error::Extraction(reason)) => Ok(Parse::Failed(
                format!("Extraction failed: {}", reason),
                ImportMetadata {
                    ocr_cache_hit: Some(ocr_cache_hit),
                    page_count,
                    ..Default::default()
                },
            )),
            Err(e) => Err(e),
        }
    }
}
