//! Rolling import-count aggregate

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::RateLimitWindow;

impl Database {
    /// Rebuild the per-user counts from imports created in the trailing window.
    ///
    /// Returns the number of users with at least one import in the window.
    pub fn refresh_rate_windows(&self, window_secs: u64) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM import_rate_windows", [])?;
        let users = tx.execute(
            r#"
            INSERT INTO import_rate_windows (user_id, import_count)
            SELECT user_id, COUNT(*)
            FROM statement_imports
            WHERE created_at >= datetime('now', ?)
            GROUP BY user_id
            "#,
            params![format!("-{} seconds", window_secs)],
        )?;

        tx.commit()?;
        Ok(users)
    }

    /// Last computed window for a user (None means no recent imports)
    pub fn get_rate_window(&self, user_id: &str) -> Result<Option<RateLimitWindow>> {
        let conn = self.conn()?;
        let window = conn
            .query_row(
                "SELECT user_id, import_count, refreshed_at FROM import_rate_windows WHERE user_id = ?",
                params![user_id],
                |row| {
                    let refreshed_at: String = row.get(2)?;
                    Ok(RateLimitWindow {
                        user_id: row.get(0)?,
                        import_count: row.get(1)?,
                        refreshed_at: parse_datetime(&refreshed_at),
                    })
                },
            )
            .optional()?;
        Ok(window)
    }
}
