//! Balance reconciliation
//!
//! Applies a statement's closing balance to its account when the balance was
//! read from a labelled line and the statement is newer than whatever set the
//! account balance last. Also checks `opening + Σ amounts` against the
//! closing balance and records the drift.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{load_account, write_account_balance};
use crate::error::{Error, Result};
use crate::models::{BalanceSource, ImportMetadata};

/// Statement figures needed to reconcile one import
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileRequest {
    pub account_id: i64,
    pub import_id: i64,
    pub opening_balance: Option<f64>,
    pub extracted_balance: Option<f64>,
    pub source: BalanceSource,
    /// Statement period end, or the import date when the period is unknown
    pub statement_date: NaiveDate,
    /// Sum of every normalized amount on the statement
    pub statement_total: f64,
}

/// What reconciliation found and did
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub previous_balance: f64,
    pub previous_balance_as_of: Option<NaiveDate>,
    pub previous_balance_import_id: Option<i64>,
    pub previous_balance_updated_at: Option<DateTime<Utc>>,
    pub extracted_balance: Option<f64>,
    pub balance_updated: bool,
    pub balance_source: BalanceSource,
    pub computed_closing_balance: Option<f64>,
    pub balance_drift: Option<f64>,
    /// A balance was stated but its source is not trusted
    pub ambiguous: bool,
}

impl Reconciliation {
    /// Copy the findings into import metadata
    pub fn record(&self, metadata: &mut ImportMetadata) {
        metadata.previous_balance = Some(self.previous_balance);
        metadata.previous_balance_as_of = self.previous_balance_as_of;
        metadata.previous_balance_import_id = self.previous_balance_import_id;
        metadata.previous_balance_updated_at = self.previous_balance_updated_at;
        metadata.extracted_balance = self.extracted_balance;
        metadata.balance_updated = Some(self.balance_updated);
        metadata.balance_source = Some(self.balance_source);
        metadata.computed_closing_balance = self.computed_closing_balance;
        metadata.balance_drift = self.balance_drift;
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct BalanceReconciler {
    /// Drift at or below this is treated as balanced
    pub tolerance: f64,
}

impl Default for BalanceReconciler {
    fn default() -> Self {
        Self { tolerance: 0.01 }
    }
}

impl BalanceReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Reconcile on an open connection (the caller's finalize transaction)
    pub fn reconcile(&self, conn: &Connection, req: &ReconcileRequest) -> Result<Reconciliation> {
        let account = load_account(conn, req.account_id)?
            .ok_or_else(|| Error::NotFound(format!("Account {}", req.account_id)))?;

        let computed_closing_balance = req
            .opening_balance
            .map(|opening| round_cents(opening + req.statement_total));
        let balance_drift = match (req.extracted_balance, computed_closing_balance) {
            (Some(closing), Some(computed)) => Some(round_cents(closing - computed)),
            _ => None,
        };

        if let Some(drift) = balance_drift {
            if drift.abs() > self.tolerance {
                warn!(
                    account_id = req.account_id,
                    import_id = req.import_id,
                    drift,
                    "Statement rows do not add up to the closing balance"
                );
            }
        }

        let ambiguous = req.extracted_balance.is_some() && !req.source.is_high_confidence();

        let last_set = account
            .balance_as_of
            .or_else(|| account.last_updated.map(|t| t.date_naive()));
        let newer = last_set.map(|d| req.statement_date > d).unwrap_or(true);

        let balance_updated = match req.extracted_balance {
            Some(balance) if req.source.is_high_confidence() && newer => {
                write_account_balance(
                    conn,
                    req.account_id,
                    balance,
                    Some(req.statement_date),
                    Some(req.import_id),
                )?;
                info!(
                    account_id = req.account_id,
                    previous = account.balance,
                    balance,
                    source = req.source.as_str(),
                    "Account balance updated from statement"
                );
                true
            }
            _ => false,
        };

        Ok(Reconciliation {
            previous_balance: account.balance,
            previous_balance_as_of: account.balance_as_of,
            previous_balance_import_id: account.balance_import_id,
            previous_balance_updated_at: account.last_updated,
            extracted_balance: req.extracted_balance,
            balance_updated,
            balance_source: req.source,
            computed_closing_balance,
            balance_drift,
            ambiguous,
        })
    }
}
