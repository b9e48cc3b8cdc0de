//! Database access layer with connection pooling and migrations
//!
//! This module is organized by table:
//! - `accounts` - Destination accounts and balances
//! - `transactions` - Ledger rows and duplicate lookups
//! - `statement_imports` - Import rows, lifecycle writes, checkpoints
//! - `ocr_results` - Content-addressed OCR cache
//! - `rate_limits` - Rolling per-user import counts
//! - `audit` - Audit log

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod audit;
mod ocr_results;
mod rate_limits;
mod statement_imports;
mod transactions;

pub use transactions::InsertOutcome;

pub(crate) use accounts::{load_account, restore_account_balance, write_account_balance};
pub(crate) use audit::insert_audit;
pub(crate) use ocr_results::delete_ocr_results_for_file;
pub(crate) use statement_imports::{
    imports_sharing_file, insert_checkpoint, load_import, swap_status, write_counts,
    write_file_hash, write_metadata, write_parsing_method, ImportCounts,
};
pub(crate) use transactions::{
    delete_import_transactions, find_by_dedup_key, find_by_reference, find_same_day_amount,
    insert_import_transaction,
};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-fx";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a stored `YYYY-MM-DD` date column
pub(crate) fn parse_date_column(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a stored enum column via its `FromStr` impl
pub(crate) fn parse_enum_column<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(Error::InvalidData(e)),
        )
    })
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `TALLY_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: Only use for development or testing.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        // Foreign keys are per-connection in SQLite
        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let init = format!("PRAGMA key = 'x\"{}\"'; PRAGMA foreign_keys = ON;", key);
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&init)?;
                Ok(())
            });
            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager =
                manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        // SQLCipher sets cipher_version if encryption is active
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the single writer finalizing an import
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Destination accounts
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                balance REAL NOT NULL DEFAULT 0,
                last_updated DATETIME,
                balance_as_of DATE,
                balance_import_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);

            -- One row per uploaded statement
            CREATE TABLE IF NOT EXISTS statement_imports (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_hash TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'processing', 'review', 'completed', 'failed', 'cancelled')),
                parsing_method TEXT
                    CHECK (parsing_method IS NULL OR parsing_method IN ('deterministic', 'ocr', 'llm')),
                total_transactions INTEGER NOT NULL DEFAULT 0,
                imported_transactions INTEGER NOT NULL DEFAULT 0,
                failed_transactions INTEGER NOT NULL DEFAULT 0,
                duplicate_transactions INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                correlation_id TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                completed_at DATETIME,
                CHECK (imported_transactions + failed_transactions <= total_transactions)
            );

            CREATE INDEX IF NOT EXISTS idx_statement_imports_user_created
                ON statement_imports(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_statement_imports_file_hash
                ON statement_imports(file_hash);
            CREATE INDEX IF NOT EXISTS idx_statement_imports_status
                ON statement_imports(status);

            -- Ledger rows; the CHECK mirrors the sign rule enforced in code
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                date DATE NOT NULL,
                description TEXT NOT NULL,
                amount REAL NOT NULL,
                type TEXT NOT NULL,
                transaction_reference TEXT,
                statement_import_id INTEGER REFERENCES statement_imports(id),
                dedup_key TEXT,
                source TEXT NOT NULL DEFAULT 'import',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                CHECK ((type = 'income' AND amount > 0) OR (type = 'expense' AND amount < 0))
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_reference
                ON transactions(account_id, date, transaction_reference);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_dedup_key
                ON transactions(account_id, dedup_key) WHERE dedup_key IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_transactions_import
                ON transactions(statement_import_id);

            -- Content-addressed OCR cache
            CREATE TABLE IF NOT EXISTS ocr_results (
                id INTEGER PRIMARY KEY,
                file_hash TEXT NOT NULL,
                ocr_content_hash TEXT NOT NULL,
                markdown_text TEXT NOT NULL,
                structured_data TEXT,
                page_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(file_hash, ocr_content_hash)
            );

            -- Stage-boundary counts per import run
            CREATE TABLE IF NOT EXISTS import_checkpoints (
                id INTEGER PRIMARY KEY,
                import_id INTEGER NOT NULL REFERENCES statement_imports(id) ON DELETE CASCADE,
                correlation_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                transaction_count INTEGER NOT NULL,
                accounted_drops INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_import_checkpoints_import
                ON import_checkpoints(import_id);

            -- Derived trailing-hour import counts, rebuilt on an interval
            CREATE TABLE IF NOT EXISTS import_rate_windows (
                user_id TEXT PRIMARY KEY,
                import_count INTEGER NOT NULL,
                refreshed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Audit log
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT,
                entity_id INTEGER,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity_type, entity_id);
            "#,
        )?;

        info!(path = %self.db_path, "Database migrations complete");
        Ok(())
    }
}
