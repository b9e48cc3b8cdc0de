//! Background task that keeps the import rate windows current
//!
//! Admission reads a precomputed per-user aggregate. This task rebuilds it
//! every `rate_refresh_secs` (config file) or `TALLY_RATE_REFRESH_SECS`
//! (environment), default 60 seconds.

use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use tally_core::{RateLimiter, TallyConfig};

/// Configuration for the rate-window refresher
#[derive(Debug, Clone)]
pub struct RateRefreshConfig {
    /// Interval between refreshes in seconds
    pub interval_secs: u64,
}

impl RateRefreshConfig {
    pub fn from_config(config: &TallyConfig) -> Self {
        Self {
            interval_secs: config.rate_refresh_secs.max(1),
        }
    }
}

/// Start the rate-window refresher as a background task
pub fn start_rate_refresh_scheduler(limiter: RateLimiter, config: RateRefreshConfig) {
    info!(
        "Starting rate window refresh: every {} seconds, limit {} per hour",
        config.interval_secs,
        limiter.limit()
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_secs));

        // Skip the first immediate tick - the server refreshes once at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match limiter.refresh() {
                Ok(users) => debug!(users, "Scheduled rate window refresh completed"),
                Err(e) => error!("Scheduled rate window refresh failed: {}", e),
            }
        }
    });
}
