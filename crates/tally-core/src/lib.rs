//! Tally Core Library
//!
//! Statement ingestion for the Tally ledger:
//! - Database access and migrations
//! - Content-addressed OCR cache and pluggable OCR engines
//! - Structured extraction backends (OpenAI-compatible, Ollama)
//! - Deterministic CSV and markdown-table statement parsing
//! - Normalization, duplicate detection and balance reconciliation
//! - Import state machine, integrity purge and rate limiting
//! - Object storage for uploaded statements

pub mod config;
pub mod context;
pub mod db;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod purge;
pub mod rate_limit;
pub mod reconcile;
pub mod statement_parser;
pub mod storage;

/// Test utilities including the mock OCR/extractor server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::TallyConfig;
pub use context::ImportContext;
pub use db::Database;
pub use dedup::{DuplicateCheck, DuplicateDetector};
pub use error::{Error, Result};
pub use extract::{
    ExtractionAdapter, ExtractionResult, ExtractorClient, MockExtractor, StructuredExtractor,
};
pub use lifecycle::{FinalizeInput, ImportStateMachine};
pub use normalize::Normalizer;
pub use ocr::{MockOcrEngine, OcrCache, OcrClient, OcrEngine};
pub use pipeline::ImportPipeline;
pub use purge::{purge_import, PurgeReport};
pub use rate_limit::RateLimiter;
pub use reconcile::BalanceReconciler;
pub use storage::{LocalObjectStore, ObjectStore};
