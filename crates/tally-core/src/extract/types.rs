//! Extraction document types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{BalanceSource, StatementPeriod};

/// Balances stated on the statement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Balances {
    pub opening: Option<f64>,
    pub closing: Option<f64>,
    pub source: BalanceSource,
}

/// Statement document produced by the extractor or the deterministic parser.
///
/// Rows stay as raw JSON until `validate_rows` so that a bad row can be
/// reported instead of failing the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub transactions: Vec<serde_json::Value>,
    #[serde(default)]
    pub balances: Balances,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default)]
    pub statement_period: Option<StatementPeriod>,
}

impl ExtractionResult {
    /// Validate the document envelope.
    ///
    /// Fails with `Error::Extraction` when the value is not an object, has no
    /// `transactions` array, or carries non-numeric balances or bad dates.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Extraction(
                "extractor returned a non-object document".into(),
            ));
        }
        if !value
            .get("transactions")
            .map(|t| t.is_array())
            .unwrap_or(false)
        {
            return Err(Error::Extraction(
                "extractor document has no transactions array".into(),
            ));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Extraction(format!("extractor document failed validation: {}", e)))
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A row that passed field validation but has not been normalized yet
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    /// Whether the amount carried an explicit sign (`-5`, `+5`, `(5)`)
    pub explicitly_signed: bool,
    /// Bank label such as `debit`, `credit`, `payment`
    pub label: Option<String>,
    pub reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unrecognized_balance_source_is_unknown() {
        let value = json!({
            "balances": { "closing": 5.0, "source": "explicit" },
            "transactions": [],
        });

        let result = ExtractionResult::from_value(&value).unwrap();
        assert_eq!(result.balances.closing, Some(5.0));
        assert_eq!(result.balances.source, BalanceSource::Unknown);
        assert!(!result.balances.source.is_high_confidence());
    }

    #[test]
    fn test_closing_balance_alias_is_trusted() {
        let value = json!({
            "balances": { "closing": 5.0, "source": "closing_balance" },
            "transactions": [],
        });

        let result = ExtractionResult::from_value(&value).unwrap();
        assert_eq!(result.balances.source, BalanceSource::ClosingBalanceLine);
    }

    #[test]
    fn test_envelope_rejections() {
        assert!(matches!(
            ExtractionResult::from_value(&json!([1, 2])),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            ExtractionResult::from_value(&json!({ "rows": [] })),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            ExtractionResult::from_value(&json!({
                "balances": { "closing": "a lot" },
                "transactions": [],
            })),
            Err(Error::Extraction(_))
        ));
    }
}
