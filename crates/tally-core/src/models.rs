//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A destination account owned by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub balance: f64,
    /// When the balance was last written
    pub last_updated: Option<DateTime<Utc>>,
    /// Statement date the current balance reflects
    pub balance_as_of: Option<NaiveDate>,
    /// Import that last set the balance (None for manual balances)
    pub balance_import_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Transaction direction. Income is always positive, expense always negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Apply this type's sign to a magnitude
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            Self::Income => amount.abs(),
            Self::Expense => -amount.abs(),
        }
    }

    /// Whether `amount` carries the sign this type requires
    pub fn agrees_with(&self, amount: f64) -> bool {
        match self {
            Self::Income => amount > 0.0,
            Self::Expense => amount < 0.0,
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            _ => Err(format!("Unknown transaction type: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a transaction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    #[default]
    Import,
    Manual,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "import" => Ok(Self::Import),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown transaction source: {}", s)),
        }
    }
}

/// A persisted ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    pub description: String,
    /// Signed amount (income > 0, expense < 0)
    pub amount: f64,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub transaction_reference: Option<String>,
    pub statement_import_id: Option<i64>,
    pub dedup_key: Option<String>,
    pub source: TransactionSource,
    pub created_at: DateTime<Utc>,
}

/// A transaction that passed normalization and is ready to insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub transaction_reference: Option<String>,
}

/// A transaction entered by hand (outside the import pipeline)
#[derive(Debug, Clone)]
pub struct NewManualTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub transaction_reference: Option<String>,
}

// ========== Statement Import Models ==========

/// Lifecycle status of a statement import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    #[default]
    Pending,
    Processing,
    Review,
    Completed,
    Failed,
    Cancelled,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Review => "review",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never left by the pipeline itself
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Review | Self::Completed | Self::Failed | Self::Cancelled
        )
    }

    /// Forward-only transition table.
    ///
    /// `processing -> processing` is allowed so a retried run can re-enter.
    /// `review|completed -> failed` is only used by the integrity purge.
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        use ImportStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Review)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
                | (Review, Failed)
                | (Completed, Failed)
        )
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "review" => Ok(Self::Review),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown import status: {}", s)),
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the transactions of an import were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsingMethod {
    /// Structured file (CSV) parsed directly
    Deterministic,
    /// OCR text contained a transaction table parsed without the extractor
    Ocr,
    /// OCR text sent through the structured extractor
    Llm,
}

impl ParsingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Ocr => "ocr",
            Self::Llm => "llm",
        }
    }
}

impl std::str::FromStr for ParsingMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deterministic" => Ok(Self::Deterministic),
            "ocr" => Ok(Self::Ocr),
            "llm" => Ok(Self::Llm),
            _ => Err(format!("Unknown parsing method: {}", s)),
        }
    }
}

impl std::fmt::Display for ParsingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance of an extracted balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    /// Extractor read an explicit closing balance line
    #[serde(alias = "closing_balance")]
    ClosingBalanceLine,
    /// Deterministic parser matched a labelled balance line in the text
    StatementLine,
    /// Derived from opening balance plus transactions
    Computed,
    /// Model guessed without a labelled line
    Inferred,
    /// Missing or unrecognized; never trusted
    #[default]
    #[serde(other)]
    Unknown,
}

impl BalanceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClosingBalanceLine => "closing_balance_line",
            Self::StatementLine => "statement_line",
            Self::Computed => "computed",
            Self::Inferred => "inferred",
            Self::Unknown => "unknown",
        }
    }

    /// Only balances read from a labelled line are trusted to overwrite an account
    pub fn is_high_confidence(&self) -> bool {
        matches!(self, Self::ClosingBalanceLine | Self::StatementLine)
    }
}

impl std::str::FromStr for BalanceSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closing_balance_line" | "closing_balance" => Ok(Self::ClosingBalanceLine),
            "statement_line" => Ok(Self::StatementLine),
            "computed" => Ok(Self::Computed),
            "inferred" => Ok(Self::Inferred),
            "unknown" | "" => Ok(Self::Unknown),
            _ => Err(format!("Unknown balance source: {}", s)),
        }
    }
}

/// Statement coverage dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatementPeriod {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Audit entry for a description-driven type flip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reclassification {
    pub row_index: usize,
    pub description: String,
    pub from_type: TransactionType,
    pub to_type: TransactionType,
    pub original_amount: f64,
    pub amount: f64,
    pub matched_phrase: String,
}

/// Audit entry for an amount whose sign disagreed with its label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignCorrection {
    pub row_index: usize,
    pub description: String,
    pub label: Option<String>,
    pub original_amount: f64,
    pub amount: f64,
}

/// A row dropped during validation or normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub row_index: usize,
    pub reason: String,
}

/// A row inserted despite resembling an existing ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PossibleDuplicate {
    pub row_index: usize,
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub existing_transaction_id: i64,
}

/// Structured metadata stored with each import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportMetadata {
    pub correlation_id: Option<String>,
    pub ocr_cache_hit: Option<bool>,
    pub extraction_cache_hit: Option<bool>,
    pub page_count: Option<i64>,
    pub bank_name: Option<String>,
    /// Last four digits only
    pub account_number: Option<String>,
    pub statement_period: Option<StatementPeriod>,
    pub opening_balance: Option<f64>,
    pub extracted_balance: Option<f64>,
    pub balance_source: Option<BalanceSource>,
    pub previous_balance: Option<f64>,
    /// Account balance provenance before this import, restored by a purge
    pub previous_balance_as_of: Option<NaiveDate>,
    pub previous_balance_import_id: Option<i64>,
    pub previous_balance_updated_at: Option<DateTime<Utc>>,
    pub balance_updated: Option<bool>,
    pub computed_closing_balance: Option<f64>,
    pub balance_drift: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reclassifications: Vec<Reclassification>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sign_corrections: Vec<SignCorrection>,
    /// Rows whose label was missing or unknown, typed from the amount sign
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inferred_type_rows: Vec<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub row_errors: Vec<RowError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub possible_duplicates: Vec<PossibleDuplicate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub review_reasons: Vec<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub integrity_flags: Vec<String>,
}

/// One uploaded statement moving through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementImport {
    pub id: i64,
    pub user_id: String,
    pub account_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_hash: Option<String>,
    pub status: ImportStatus,
    pub parsing_method: Option<ParsingMethod>,
    pub total_transactions: i64,
    pub imported_transactions: i64,
    pub failed_transactions: i64,
    pub duplicate_transactions: i64,
    pub metadata: ImportMetadata,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatementImport {
    /// Outcome as reported to callers of the trigger endpoint
    pub fn outcome(&self) -> ImportOutcome {
        ImportOutcome {
            import_id: self.id,
            success: matches!(self.status, ImportStatus::Completed | ImportStatus::Review),
            status: self.status,
            total_transactions: self.total_transactions,
            imported_transactions: self.imported_transactions,
            failed_transactions: self.failed_transactions,
            duplicate_transactions: self.duplicate_transactions,
        }
    }
}

/// Input for creating a pending import
#[derive(Debug, Clone)]
pub struct NewStatementImport {
    pub user_id: String,
    pub account_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub file_hash: Option<String>,
}

/// Result of processing one import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub import_id: i64,
    pub success: bool,
    pub status: ImportStatus,
    pub total_transactions: i64,
    pub imported_transactions: i64,
    pub failed_transactions: i64,
    pub duplicate_transactions: i64,
}

// ========== OCR Cache ==========

/// Immutable, content-addressed OCR output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub id: i64,
    pub file_hash: String,
    pub ocr_content_hash: String,
    pub markdown_text: String,
    pub structured_data: Option<serde_json::Value>,
    pub page_count: i64,
    pub created_at: DateTime<Utc>,
}

// ========== Checkpoints ==========

/// Pipeline stage boundaries recorded per import
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStage {
    OcrDone,
    ExtractionDone,
    NormalizationDone,
    PreInsert,
    PostInsert,
}

impl CheckpointStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OcrDone => "ocr_done",
            Self::ExtractionDone => "extraction_done",
            Self::NormalizationDone => "normalization_done",
            Self::PreInsert => "pre_insert",
            Self::PostInsert => "post_insert",
        }
    }
}

impl std::str::FromStr for CheckpointStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ocr_done" => Ok(Self::OcrDone),
            "extraction_done" => Ok(Self::ExtractionDone),
            "normalization_done" => Ok(Self::NormalizationDone),
            "pre_insert" => Ok(Self::PreInsert),
            "post_insert" => Ok(Self::PostInsert),
            _ => Err(format!("Unknown checkpoint stage: {}", s)),
        }
    }
}

impl std::fmt::Display for CheckpointStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Running transaction count at a stage boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCheckpoint {
    pub id: i64,
    pub import_id: i64,
    pub correlation_id: String,
    pub stage: CheckpointStage,
    pub transaction_count: i64,
    /// Rows intentionally removed at this stage (failed or duplicate)
    pub accounted_drops: i64,
    pub created_at: DateTime<Utc>,
}

/// A count decrease between two checkpoints that no failure or duplicate explains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountRegression {
    pub from_stage: CheckpointStage,
    pub to_stage: CheckpointStage,
    pub previous_count: i64,
    pub count: i64,
    pub unexplained: i64,
}

// ========== Rate Limiting ==========

/// Trailing-hour import count for one user (derived, not authoritative)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    pub user_id: String,
    pub import_count: i64,
    pub refreshed_at: DateTime<Utc>,
}

// ========== Audit ==========

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
}
