//! Status command implementation

use std::path::Path;

use anyhow::Result;
use tally_core::TallyConfig;

use super::open_db;

pub fn cmd_status(db_path: &Path, no_encrypt: bool, config: &TallyConfig) -> Result<()> {
    use std::fs;
    use tally_core::db::DB_KEY_ENV;

    println!();
    println!("📊 Tally Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Database path
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    // Check encryption status
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    println!();
    println!("   Storage: {}", config.storage_dir.display());
    println!(
        "   Rate limit: {} imports/hour (refresh every {}s)",
        config.rate_limit_per_hour, config.rate_refresh_secs
    );
    match config.reclassify_rules {
        Some(ref path) => println!("   Reclassify rules: {}", path.display()),
        None => println!("   Reclassify rules: built-in"),
    }
    println!(
        "   OCR backend: {}",
        std::env::var("OCR_BACKEND").unwrap_or_else(|_| "http".to_string())
    );
    println!(
        "   Extractor backend: {}",
        std::env::var("EXTRACTOR_BACKEND").unwrap_or_else(|_| "openai_compatible".to_string())
    );
    println!("   Operator API keys: {}", config.api_keys.len());

    // Try to open the database and show stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => {
                let accounts = db.list_accounts(None)?;
                let conn = db.conn()?;
                let imports: i64 =
                    conn.query_row("SELECT COUNT(*) FROM statement_imports", [], |r| r.get(0))?;
                let transactions: i64 =
                    conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;
                println!();
                println!("   Accounts: {}", accounts.len());
                println!("   Imports: {}", imports);
                println!("   Transactions: {}", transactions);
            }
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                }
            }
        }
    }
    println!();

    Ok(())
}
