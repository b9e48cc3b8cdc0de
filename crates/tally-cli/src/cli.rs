//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Bank statement ingestion
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Turn bank statements into ledger transactions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// User the command acts for
    #[arg(long, default_value = "local", global = true)]
    pub user: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and storage directory
    Init,

    /// Show database, configuration and pipeline status
    Status,

    /// Manage accounts
    Accounts {
        #[command(subcommand)]
        action: Option<AccountsAction>,
    },

    /// Upload a statement and run it through the pipeline
    Import {
        /// Statement file (PDF, image or CSV)
        #[arg(short, long)]
        file: PathBuf,

        /// Destination account ID
        #[arg(short, long)]
        account: i64,

        /// Only upload; leave the import pending
        #[arg(long)]
        no_process: bool,
    },

    /// Run a pending import
    Process {
        /// Import ID
        id: i64,
    },

    /// List recent imports
    Imports {
        /// Maximum number of imports to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show one import with its metadata and checkpoints
    Show {
        /// Import ID
        id: i64,
    },

    /// Cancel a pending or processing import
    Cancel {
        /// Import ID
        id: i64,
    },

    /// Remove everything a bad import wrote (transactions, balance, OCR cache)
    Purge {
        /// Import ID
        id: i64,

        /// Why the import is being purged (recorded in the audit log)
        #[arg(short, long)]
        reason: String,
    },

    /// Import rate limiting
    RateLimit {
        #[command(subcommand)]
        action: RateLimitAction,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        #[arg(long)]
        no_auth: bool,

        /// Allowed CORS origin (repeatable)
        #[arg(long = "allow-origin")]
        allowed_origins: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountsAction {
    /// List accounts
    List {
        /// Show every user's accounts
        #[arg(long)]
        all: bool,
    },

    /// Create an account
    Add {
        /// Account name
        name: String,

        /// Starting balance
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        balance: f64,
    },
}

#[derive(Subcommand)]
pub enum RateLimitAction {
    /// Rebuild the trailing-hour import counts
    Refresh,

    /// Show the current user's count against the limit
    Show,
}
