//! Server command implementation

use std::path::Path;

use anyhow::Result;
use tally_core::TallyConfig;

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
    allowed_origins: Vec<String>,
    config: TallyConfig,
) -> Result<()> {
    println!("🚀 Starting Tally web server...");
    println!("   Database: {}", db_path.display());
    println!("   Storage: {}", config.storage_dir.display());
    println!("   Listening: http://{}:{}", host, port);

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else {
        println!("   🔒 Authentication: x-user-id header (set by your gateway)");
        if config.api_keys.is_empty() {
            println!("   🔑 No operator API keys (TALLY_API_KEYS); purge is disabled");
        } else {
            println!(
                "   🔑 Operator API keys: {} configured (TALLY_API_KEYS)",
                config.api_keys.len()
            );
        }
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    let server_config = tally_server::ServerConfig {
        require_auth: !no_auth,
        allowed_origins,
        api_keys: config.api_keys.clone(),
    };

    tally_server::serve_with_config(db, host, port, config, server_config).await?;

    Ok(())
}
