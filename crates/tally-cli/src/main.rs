//! Tally CLI - Bank statement ingestion
//!
//! Usage:
//!   tally init                              Initialize database
//!   tally accounts add Checking             Create an account
//!   tally import --file march.pdf -a 1      Upload and process a statement
//!   tally show 7                            Inspect an import
//!   tally serve --port 3000                 Start web server

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config()?;

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt, &config),
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt, &config),
        Commands::Accounts { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_accounts_list(&db, Some(&cli.user)),
                Some(AccountsAction::List { all }) => {
                    let user = if all { None } else { Some(cli.user.as_str()) };
                    commands::cmd_accounts_list(&db, user)
                }
                Some(AccountsAction::Add { name, balance }) => {
                    commands::cmd_accounts_add(&db, &cli.user, &name, balance).map(|_| ())
                }
            }
        }
        Commands::Import {
            file,
            account,
            no_process,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::build_pipeline(db, &config)?;
            commands::cmd_import(&pipeline, &cli.user, &file, account, !no_process)
                .await
                .map(|_| ())
        }
        Commands::Process { id } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let pipeline = commands::build_pipeline(db, &config)?;
            commands::cmd_process(&pipeline, &cli.user, id)
                .await
                .map(|_| ())
        }
        Commands::Imports { limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_imports_list(&db, &cli.user, limit)
        }
        Commands::Show { id } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_show(&db, id)
        }
        Commands::Cancel { id } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_cancel(&db, id, &cli.user)
        }
        Commands::Purge { id, reason } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_purge(&db, id, &reason, &cli.user).map(|_| ())
        }
        Commands::RateLimit { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                RateLimitAction::Refresh => {
                    commands::cmd_rate_limit_refresh(&db, &config).map(|_| ())
                }
                RateLimitAction::Show => commands::cmd_rate_limit_show(&db, &cli.user, &config),
            }
        }
        Commands::Serve {
            port,
            host,
            no_auth,
            allowed_origins,
        } => {
            commands::cmd_serve(
                &cli.db,
                &host,
                port,
                no_auth,
                cli.no_encrypt,
                allowed_origins,
                config,
            )
            .await
        }
    }
}
