//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Resolve the Tally configuration
//! - `build_pipeline` - Import pipeline from configuration
//! - `cmd_init` - Initialize the database and storage directory

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{Database, ImportPipeline, TallyConfig};
use tracing::debug;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    debug!(path = path_str, encrypted = !no_encrypt, "Opening database");
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

pub fn load_config() -> Result<TallyConfig> {
    TallyConfig::load().context("Failed to load configuration")
}

pub fn build_pipeline(db: Database, config: &TallyConfig) -> Result<ImportPipeline> {
    ImportPipeline::from_config(db, config).context("Failed to set up the import pipeline")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool, config: &TallyConfig) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    std::fs::create_dir_all(&config.storage_dir).with_context(|| {
        format!(
            "Failed to create storage directory {}",
            config.storage_dir.display()
        )
    })?;
    println!("   Statement storage: {}", config.storage_dir.display());

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }
    println!("   Database file: {}", db.path());

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Create an account: tally accounts add Checking");
    println!("  2. Import a statement: tally import --file statement.pdf --account 1");
    println!("  3. Start the API: tally serve");

    Ok(())
}
