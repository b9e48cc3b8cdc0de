//! Audit log operations

use rusqlite::{params, Connection};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::AuditEntry;

/// Append an audit row on an existing connection
pub(crate) fn insert_audit(
    conn: &Connection,
    actor: &str,
    action: &str,
    entity_type: Option<&str>,
    entity_id: Option<i64>,
    details: Option<&str>,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO audit_log (actor, action, entity_type, entity_id, details)
        VALUES (?, ?, ?, ?, ?)
        "#,
        params![actor, action, entity_type, entity_id, details],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Log an audit event
    pub fn log_audit(
        &self,
        actor: &str,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<i64>,
        details: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        insert_audit(&conn, actor, action, entity_type, entity_id, details)
    }

    /// List audit entries for one entity, oldest first
    pub fn list_audit_for_entity(&self, entity_type: &str, entity_id: i64) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, timestamp, actor, action, entity_type, entity_id, details
            FROM audit_log
            WHERE entity_type = ? AND entity_id = ?
            ORDER BY id
            "#,
        )?;

        let entries = stmt
            .query_map(params![entity_type, entity_id], |row| {
                let timestamp: String = row.get(1)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: parse_datetime(&timestamp),
                    actor: row.get(2)?,
                    action: row.get(3)?,
                    entity_type: row.get(4)?,
                    entity_id: row.get(5)?,
                    details: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}
