//! Parsing and validation helpers for extractor output
//!
//! Model responses often wrap the JSON document in prose, so the first `{`
//! to the last `}` is parsed. Row validation never guesses: a row missing a
//! date, description or amount is reported, not repaired.

use chrono::NaiveDate;
use serde_json::Value;

use super::types::RawTransaction;
use crate::error::{Error, Result};
use crate::models::RowError;

fn truncate_raw(s: &str) -> String {
    if s.len() > 200 {
        let mut end = 200;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    } else {
        s.to_string()
    }
}

/// Extract the JSON object from a model response
pub fn parse_json_object(response: &str) -> Result<Value> {
    let response = response.trim();
    let start = response.find('{');
    let end = response.rfind('}');

    match (start, end) {
        (Some(s), Some(e)) if s < e => {
            let json_str = &response[s..=e];
            serde_json::from_str(json_str).map_err(|e| {
                Error::Extraction(format!(
                    "Invalid JSON from extractor: {} | Raw: {}",
                    e,
                    truncate_raw(json_str)
                ))
            })
        }
        _ => Err(Error::Extraction(format!(
            "No JSON found in extractor response | Raw: {}",
            truncate_raw(response)
        ))),
    }
}

/// Parse a statement date in the formats banks commonly print
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();

    let formats = [
        "%Y-%m-%d", // 2024-01-15
        "%m/%d/%Y", // 01/15/2024
        "%m/%d/%y", // 01/15/24
        "%m-%d-%Y", // 01-15-2024
        "%d %b %Y", // 15 Jan 2024
        "%b %d, %Y", // Jan 15, 2024
    ];

    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(Error::InvalidData(format!("Unable to parse date: {}", s)))
}

/// Parse an amount string, handling currency symbols, commas and
/// accounting parentheses. Returns the value and whether a sign was written.
pub fn parse_amount(s: &str) -> Result<(f64, bool)> {
    let trimmed = s.trim();
    let explicitly_signed =
        trimmed.starts_with('-') || trimmed.starts_with('+') || trimmed.starts_with('(');

    let cleaned: String = trimmed
        .replace(['$', '€', '£', ',', ' '], "")
        .replace('(', "-")
        .replace(')', "");

    let value = cleaned
        .parse::<f64>()
        .map_err(|_| Error::InvalidData(format!("Unable to parse amount: {}", s)))?;

    if !value.is_finite() {
        return Err(Error::InvalidData(format!("Unable to parse amount: {}", s)));
    }

    Ok((value, explicitly_signed))
}

fn string_field<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| row.get(*k))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn validate_row(row: &Value) -> std::result::Result<RawTransaction, String> {
    if !row.is_object() {
        return Err("row is not an object".into());
    }

    let date = string_field(row, &["date", "transactionDate"])
        .ok_or_else(|| "missing date".to_string())?;
    let date = parse_date(date).map_err(|e| e.to_string())?;

    let description = string_field(row, &["description", "memo"])
        .ok_or_else(|| "missing description".to_string())?
        .to_string();

    let (amount, explicitly_signed) = match row.get("amount") {
        None | Some(Value::Null) => return Err("missing amount".into()),
        Some(Value::Number(n)) => {
            let value = n
                .as_f64()
                .ok_or_else(|| format!("non-numeric amount: {}", n))?;
            (value, value < 0.0)
        }
        Some(Value::String(s)) if s.trim().is_empty() => return Err("missing amount".into()),
        Some(Value::String(s)) => parse_amount(s).map_err(|e| e.to_string())?,
        Some(other) => return Err(format!("non-numeric amount: {}", other)),
    };

    let label = string_field(row, &["type", "label"]).map(|s| s.to_lowercase());
    let reference =
        string_field(row, &["reference", "transactionReference"]).map(|s| s.to_string());

    Ok(RawTransaction {
        date,
        description,
        amount,
        explicitly_signed,
        label,
        reference,
    })
}

/// Split extracted rows into valid rows (with their original index) and row errors
pub fn validate_rows(rows: &[Value]) -> (Vec<(usize, RawTransaction)>, Vec<RowError>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        match validate_row(row) {
            Ok(tx) => valid.push((row_index, tx)),
            Err(reason) => errors.push(RowError { row_index, reason }),
        }
    }

    (valid, errors)
}
