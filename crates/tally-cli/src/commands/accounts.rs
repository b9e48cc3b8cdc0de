//! Account commands

use anyhow::{Context, Result};
use tally_core::db::Database;

use super::truncate;

pub fn cmd_accounts_list(db: &Database, user_id: Option<&str>) -> Result<()> {
    let accounts = db.list_accounts(user_id)?;

    if accounts.is_empty() {
        println!("No accounts yet. Create one with: tally accounts add <name>");
        return Ok(());
    }

    println!();
    println!(
        "   {:>4}  {:<24} {:<12} {:>12}  {:<10}  Source",
        "ID", "Name", "User", "Balance", "As of"
    );
    println!("   ─────────────────────────────────────────────────────────────────────────");
    for account in &accounts {
        let as_of = account
            .balance_as_of
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let source = match account.balance_import_id {
            Some(id) => format!("import #{}", id),
            None => "manual".to_string(),
        };
        println!(
            "   {:>4}  {:<24} {:<12} {:>12.2}  {:<10}  {}",
            account.id,
            truncate(&account.name, 24),
            truncate(&account.user_id, 12),
            account.balance,
            as_of,
            source
        );
    }
    println!();

    Ok(())
}

pub fn cmd_accounts_add(db: &Database, user_id: &str, name: &str, balance: f64) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Account name cannot be empty");
    }

    let id = db
        .create_account(user_id, name, balance)
        .context("Failed to create account")?;
    db.log_audit(
        user_id,
        "create",
        Some("account"),
        Some(id),
        Some(&format!("name={}", name)),
    )?;

    println!("✅ Created account #{} \"{}\" (balance {:.2})", id, name, balance);
    Ok(id)
}
