//! Per-user import rate limiting
//!
//! Admission reads the precomputed `import_rate_windows` aggregate instead of
//! counting imports on every request. The aggregate is rebuilt on an interval
//! by the server scheduler, so a burst inside one refresh interval can exceed
//! the limit by the imports started since the last refresh.

use tracing::{debug, info};

use crate::db::Database;
use crate::error::Result;

/// Default imports allowed per user per hour
pub const DEFAULT_LIMIT_PER_HOUR: i64 = 10;

/// Trailing window length in seconds
pub const WINDOW_SECS: u64 = 3600;

#[derive(Clone)]
pub struct RateLimiter {
    db: Database,
    limit_per_hour: i64,
}

impl RateLimiter {
    pub fn new(db: Database, limit_per_hour: i64) -> Self {
        Self { db, limit_per_hour }
    }

    pub fn limit(&self) -> i64 {
        self.limit_per_hour
    }

    /// Whether the user may start another import
    pub fn admit(&self, user_id: &str) -> Result<bool> {
        let count = self
            .db
            .get_rate_window(user_id)?
            .map(|w| w.import_count)
            .unwrap_or(0);
        let admitted = count < self.limit_per_hour;
        debug!(user_id, count, limit = self.limit_per_hour, admitted, "Rate limit check");
        Ok(admitted)
    }

    /// Rebuild the trailing-hour aggregate
    pub fn refresh(&self) -> Result<usize> {
        let users = self.db.refresh_rate_windows(WINDOW_SECS)?;
        info!(users, "Refreshed import rate windows");
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStatementImport;

    fn create_imports(db: &Database, user_id: &str, n: usize) {
        let account_id = db.create_account(user_id, "Checking", 0.0).unwrap();
        for i in 0..n {
            db.create_statement_import(&NewStatementImport {
                user_id: user_id.into(),
                account_id,
                file_name: format!("s{}.pdf", i),
                file_path: format!("{}/{}/s{}.pdf", user_id, account_id, i),
                file_hash: None,
            })
            .unwrap();
        }
    }

    #[test]
    fn test_admit_without_window() {
        let limiter = RateLimiter::new(Database::in_memory().unwrap(), 2);
        assert!(limiter.admit("nobody").unwrap());
    }

    #[test]
    fn test_limit_applies_after_refresh() {
        let db = Database::in_memory().unwrap();
        let limiter = RateLimiter::new(db.clone(), 2);
        create_imports(&db, "busy", 2);
        create_imports(&db, "quiet", 1);

        // Not yet refreshed: the aggregate is stale
        assert!(limiter.admit("busy").unwrap());

        assert_eq!(limiter.refresh().unwrap(), 2);
        assert!(!limiter.admit("busy").unwrap());
        assert!(limiter.admit("quiet").unwrap());
    }
}
