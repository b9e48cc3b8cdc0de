//! Rate limit commands

use anyhow::{Context, Result};
use tally_core::{db::Database, RateLimiter, TallyConfig};

pub fn cmd_rate_limit_refresh(db: &Database, config: &TallyConfig) -> Result<usize> {
    let limiter = RateLimiter::new(db.clone(), config.rate_limit_per_hour);
    let users = limiter
        .refresh()
        .context("Failed to refresh rate windows")?;
    println!("✅ Rate windows refreshed for {} user(s)", users);
    Ok(users)
}

pub fn cmd_rate_limit_show(db: &Database, user_id: &str, config: &TallyConfig) -> Result<()> {
    match db.get_rate_window(user_id)? {
        Some(window) => println!(
            "{}: {} of {} imports in the last hour (as of {})",
            user_id,
            window.import_count,
            config.rate_limit_per_hour,
            window.refreshed_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!(
            "{}: no imports counted at the last refresh (limit {})",
            user_id, config.rate_limit_per_hour
        ),
    }
    Ok(())
}
