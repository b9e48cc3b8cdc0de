//! Transaction operations

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_date_column, parse_datetime, parse_enum_column, Database};
use crate::error::{Error, Result};
use crate::models::{NewManualTransaction, NormalizedTransaction, Transaction, TransactionType};

const TRANSACTION_COLUMNS: &str = "id, account_id, date, description, amount, type, \
     transaction_reference, statement_import_id, dedup_key, source, created_at";

/// Result of inserting an imported transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row was inserted with this ID
    Inserted(i64),
    /// The dedup key already existed for the account
    Duplicate,
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let date: String = row.get(2)?;
    let tx_type: String = row.get(5)?;
    let source: String = row.get(9)?;
    let created_at: String = row.get(10)?;

    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        date: parse_date_column(2, &date)?,
        description: row.get(3)?,
        amount: row.get(4)?,
        transaction_type: parse_enum_column(5, &tx_type)?,
        transaction_reference: row.get(6)?,
        statement_import_id: row.get(7)?,
        dedup_key: row.get(8)?,
        source: parse_enum_column(9, &source)?,
        created_at: parse_datetime(&created_at),
    })
}

/// Insert one imported row. A concurrent insert with the same dedup key
/// surfaces as `InsertOutcome::Duplicate`, never as a second row.
pub(crate) fn insert_import_transaction(
    conn: &Connection,
    account_id: i64,
    import_id: i64,
    tx: &NormalizedTransaction,
    dedup_key: &str,
) -> Result<InsertOutcome> {
    if !tx.transaction_type.agrees_with(tx.amount) {
        return Err(Error::InvalidData(format!(
            "{} amount {} has the wrong sign",
            tx.transaction_type, tx.amount
        )));
    }

    let changed = conn.execute(
        r#"
        INSERT INTO transactions
            (account_id, date, description, amount, type, transaction_reference,
             statement_import_id, dedup_key, source)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'import')
        ON CONFLICT (account_id, dedup_key) WHERE dedup_key IS NOT NULL DO NOTHING
        "#,
        params![
            account_id,
            tx.date.to_string(),
            tx.description,
            tx.amount,
            tx.transaction_type.as_str(),
            tx.transaction_reference,
            import_id,
            dedup_key,
        ],
    )?;

    if changed == 0 {
        Ok(InsertOutcome::Duplicate)
    } else {
        Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
    }
}

/// Existing row holding a dedup key
pub(crate) fn find_by_dedup_key(
    conn: &Connection,
    account_id: i64,
    dedup_key: &str,
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM transactions WHERE account_id = ? AND dedup_key = ?",
            params![account_id, dedup_key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Existing row with the same bank reference on the same date
pub(crate) fn find_by_reference(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    reference: &str,
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            r#"
            SELECT id FROM transactions
            WHERE account_id = ? AND date = ? AND transaction_reference = ?
            ORDER BY id LIMIT 1
            "#,
            params![account_id, date.to_string(), reference],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Rows on the same date with the same amount (to the cent)
pub(crate) fn find_same_day_amount(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    amount: f64,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM transactions
        WHERE account_id = ? AND date = ? AND ABS(amount - ?) < 0.005
        ORDER BY id
        "#,
        TRANSACTION_COLUMNS
    ))?;

    let rows = stmt
        .query_map(
            params![account_id, date.to_string(), amount],
            row_to_transaction,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete every row written by an import
pub(crate) fn delete_import_transactions(conn: &Connection, import_id: i64) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM transactions WHERE statement_import_id = ?",
        params![import_id],
    )?)
}

impl Database {
    /// Insert a hand-entered transaction. Type follows the amount's sign.
    pub fn insert_manual_transaction(
        &self,
        account_id: i64,
        tx: &NewManualTransaction,
    ) -> Result<i64> {
        let tx_type = if tx.amount > 0.0 {
            TransactionType::Income
        } else if tx.amount < 0.0 {
            TransactionType::Expense
        } else {
            return Err(Error::InvalidData(
                "Manual transaction amount must be non-zero".into(),
            ));
        };

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO transactions
                (account_id, date, description, amount, type, transaction_reference, source)
            VALUES (?, ?, ?, ?, ?, ?, 'manual')
            "#,
            params![
                account_id,
                tx.date.to_string(),
                tx.description,
                tx.amount,
                tx_type.as_str(),
                tx.transaction_reference,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Transactions written by one import
    pub fn list_import_transactions(&self, import_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE statement_import_id = ? ORDER BY date, id",
            TRANSACTION_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![import_id], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All transactions for an account
    pub fn list_account_transactions(&self, account_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE account_id = ? ORDER BY date, id",
            TRANSACTION_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![account_id], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count transactions for an account
    pub fn count_account_transactions(&self, account_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE account_id = ?",
            params![account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
