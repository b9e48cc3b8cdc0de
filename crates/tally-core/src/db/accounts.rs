//! Account operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_date_column, parse_datetime, Database};
use crate::error::Result;
use crate::models::Account;

const ACCOUNT_COLUMNS: &str =
    "id, user_id, name, balance, last_updated, balance_as_of, balance_import_id, created_at";

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    let last_updated: Option<String> = row.get(4)?;
    let balance_as_of: Option<String> = row.get(5)?;
    let created_at: String = row.get(7)?;

    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        balance: row.get(3)?,
        last_updated: last_updated.as_deref().map(parse_datetime),
        balance_as_of: balance_as_of
            .as_deref()
            .map(|s| parse_date_column(5, s))
            .transpose()?,
        balance_import_id: row.get(6)?,
        created_at: parse_datetime(&created_at),
    })
}

/// Load an account on an existing connection (used inside import transactions)
pub(crate) fn load_account(conn: &Connection, account_id: i64) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
            params![account_id],
            row_to_account,
        )
        .optional()?;
    Ok(account)
}

/// Overwrite an account balance and its provenance
pub(crate) fn write_account_balance(
    conn: &Connection,
    account_id: i64,
    balance: f64,
    as_of: Option<NaiveDate>,
    import_id: Option<i64>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE accounts SET
            balance = ?,
            balance_as_of = ?,
            balance_import_id = ?,
            last_updated = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
        params![
            balance,
            as_of.map(|d| d.to_string()),
            import_id,
            account_id
        ],
    )?;
    Ok(())
}

/// Put a balance back exactly as it was before an import overwrote it.
///
/// Unlike `write_account_balance` this does not stamp `last_updated`, so a
/// corrected statement for the same period still counts as newer.
pub(crate) fn restore_account_balance(
    conn: &Connection,
    account_id: i64,
    balance: f64,
    as_of: Option<NaiveDate>,
    import_id: Option<i64>,
    last_updated: Option<DateTime<Utc>>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE accounts SET
            balance = ?,
            balance_as_of = ?,
            balance_import_id = ?,
            last_updated = ?
        WHERE id = ?
        "#,
        params![
            balance,
            as_of.map(|d| d.to_string()),
            import_id,
            last_updated.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            account_id
        ],
    )?;
    Ok(())
}

impl Database {
    /// Create an account for a user
    pub fn create_account(&self, user_id: &str, name: &str, opening_balance: f64) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (user_id, name, balance) VALUES (?, ?, ?)",
            params![user_id, name, opening_balance],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get an account by ID
    pub fn get_account(&self, account_id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        load_account(&conn, account_id)
    }

    /// List accounts, optionally for a single user
    pub fn list_accounts(&self, user_id: Option<&str>) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE (?1 IS NULL OR user_id = ?1) ORDER BY name",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![user_id], row_to_account)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Set a balance by hand (clears import provenance)
    pub fn set_account_balance(
        &self,
        account_id: i64,
        balance: f64,
        as_of: Option<NaiveDate>,
    ) -> Result<()> {
        let conn = self.conn()?;
        write_account_balance(&conn, account_id, balance, as_of, None)
    }
}
