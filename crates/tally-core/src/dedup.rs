//! Duplicate detection per destination account
//!
//! Rows with a bank reference are keyed by `(date, reference)`. Rows without
//! one are keyed by `(date, amount, normalized description, occurrence)`,
//! where occurrence counts identical rows within one statement. Two identical
//! coffee purchases on the same day therefore both persist, while importing
//! the same statement again maps every row onto an existing key.
//!
//! Keys are stored in `transactions.dedup_key` under a unique index, so the
//! check here is an early answer and the index is the final word.
//! `find_duplicate` is the shared ledger lookup: `is_duplicate` asks it about
//! a single row, and `DuplicateDetector::check` asks it with the running
//! import's own rows excluded.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::{find_by_dedup_key, find_by_reference, find_same_day_amount};
use crate::error::Result;
use crate::models::NormalizedTransaction;
use crate::ocr::hash_bytes;

/// Uppercase, strip punctuation, collapse whitespace
pub fn normalize_description(description: &str) -> String {
    description
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn amount_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Key for a row that carries a bank reference
pub fn reference_key(date: NaiveDate, reference: &str) -> String {
    hash_bytes(format!("ref|{}|{}", date, reference.trim()).as_bytes())
}

/// Key for a row without a reference; `occurrence` starts at 1
pub fn fallback_key(date: NaiveDate, amount: f64, description: &str, occurrence: u32) -> String {
    hash_bytes(
        format!(
            "row|{}|{}|{}|{}",
            date,
            amount_cents(amount),
            normalize_description(description),
            occurrence
        )
        .as_bytes(),
    )
}

fn has_reference(reference: Option<&str>) -> Option<&str> {
    reference.map(str::trim).filter(|r| !r.is_empty())
}

/// Id of an equivalent row already in the account's ledger.
///
/// With a reference this is an exact `(date, reference)` match. Without
/// one it falls back to same date, same amount to the cent and the same
/// normalized description. Rows written by `skip_import` are ignored.
pub fn find_duplicate(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    transaction_reference: Option<&str>,
    amount: f64,
    description: &str,
    skip_import: Option<i64>,
) -> Result<Option<i64>> {
    if let Some(reference) = has_reference(transaction_reference) {
        return find_by_reference(conn, account_id, date, reference);
    }

    let wanted = normalize_description(description);
    Ok(find_same_day_amount(conn, account_id, date, amount)?
        .into_iter()
        .find(|t| {
            (skip_import.is_none() || t.statement_import_id != skip_import)
                && normalize_description(&t.description) == wanted
        })
        .map(|t| t.id))
}

/// Whether an equivalent row is already in the account's ledger
pub fn is_duplicate(
    conn: &Connection,
    account_id: i64,
    date: NaiveDate,
    transaction_reference: Option<&str>,
    amount: f64,
    description: &str,
) -> Result<bool> {
    Ok(find_duplicate(
        conn,
        account_id,
        date,
        transaction_reference,
        amount,
        description,
        None,
    )?
    .is_some())
}

/// Answer for one row of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// Already in the ledger; skip
    Duplicate(i64),
    /// Key is new but a similar row exists elsewhere; insert and flag
    PossibleDuplicate(i64),
    New,
}

/// Per-statement duplicate filter.
///
/// Holds the occurrence counters for one run over a statement, so a fresh
/// filter must be used for every run.
pub struct DuplicateDetector {
    account_id: i64,
    import_id: i64,
    occurrences: HashMap<(NaiveDate, i64, String), u32>,
}

impl DuplicateDetector {
    pub fn new(account_id: i64, import_id: i64) -> Self {
        Self {
            account_id,
            import_id,
            occurrences: HashMap::new(),
        }
    }

    /// Dedup key for the next row of the statement
    pub fn key_for(&mut self, tx: &NormalizedTransaction) -> String {
        if let Some(reference) = has_reference(tx.transaction_reference.as_deref()) {
            return reference_key(tx.date, reference);
        }

        let slot = (
            tx.date,
            amount_cents(tx.amount),
            normalize_description(&tx.description),
        );
        let occurrence = self.occurrences.entry(slot).or_insert(0);
        *occurrence += 1;
        fallback_key(tx.date, tx.amount, &tx.description, *occurrence)
    }

    /// Classify a row whose key came from `key_for`
    pub fn check(
        &self,
        conn: &Connection,
        tx: &NormalizedTransaction,
        dedup_key: &str,
    ) -> Result<DuplicateCheck> {
        if let Some(id) = find_by_dedup_key(conn, self.account_id, dedup_key)? {
            return Ok(DuplicateCheck::Duplicate(id));
        }

        let existing = find_duplicate(
            conn,
            self.account_id,
            tx.date,
            tx.transaction_reference.as_deref(),
            tx.amount,
            &tx.description,
            Some(self.import_id),
        )?;

        // A reference match is exact (manual entries carry references but no
        // dedup key); a description match is only a resemblance
        let exact = has_reference(tx.transaction_reference.as_deref()).is_some();
        Ok(match existing {
            Some(id) if exact => DuplicateCheck::Duplicate(id),
            Some(id) => DuplicateCheck::PossibleDuplicate(id),
            None => DuplicateCheck::New,
        })
    }
}
