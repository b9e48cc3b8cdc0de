//! Deterministic statement parsing
//!
//! CSV exports and OCR text that contains a recognizable transaction table
//! are turned into a statement document without calling the extractor.
//! Rows are emitted as raw JSON so they go through the same row validation
//! as extractor output.

use std::sync::OnceLock;

use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::extract::{parsing::parse_amount, Balances, ExtractionResult};
use crate::models::BalanceSource;

/// Column positions recognized in a header row
#[derive(Debug, Default, Clone, PartialEq)]
struct ColumnMap {
    date: Option<usize>,
    description: Option<usize>,
    amount: Option<usize>,
    debit: Option<usize>,
    credit: Option<usize>,
    label: Option<usize>,
    reference: Option<usize>,
}

impl ColumnMap {
    fn from_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Option<Self> {
        let mut map = ColumnMap::default();

        for (i, header) in headers.enumerate() {
            let header = header.trim().to_lowercase();
            let slot = match header.as_str() {
                "date" | "transaction date" | "posting date" | "posted date" | "post date" => {
                    &mut map.date
                }
                "description" | "details" | "memo" | "payee" | "narrative" | "transaction" => {
                    &mut map.description
                }
                "amount" | "transaction amount" => &mut map.amount,
                "debit" | "debits" | "withdrawal" | "withdrawals" | "debit amount" => {
                    &mut map.debit
                }
                "credit" | "credits" | "deposit" | "deposits" | "credit amount" => {
                    &mut map.credit
                }
                "type" | "transaction type" => &mut map.label,
                "reference" | "ref" | "ref no" | "reference number" | "check number"
                | "transaction id" => &mut map.reference,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(i);
            }
        }

        let has_amount = map.amount.is_some() || (map.debit.is_some() && map.credit.is_some());
        if map.date.is_some() && map.description.is_some() && has_amount {
            Some(map)
        } else {
            None
        }
    }

    /// Build a raw row object; empty cells are left out so validation reports them
    fn row(&self, cell: impl Fn(usize) -> Option<String>) -> Value {
        let get = |idx: Option<usize>| {
            idx.and_then(&cell)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let mut row = Map::new();
        if let Some(date) = get(self.date) {
            row.insert("date".into(), Value::String(date));
        }
        if let Some(description) = get(self.description) {
            row.insert("description".into(), Value::String(description));
        }

        // Exports with split columns often fill the unused side with 0.00
        let side = |idx: Option<usize>| {
            get(idx).filter(|s| !matches!(parse_amount(s), Ok((v, _)) if v == 0.0))
        };

        let mut label = get(self.label);
        let amount = match get(self.amount) {
            Some(amount) => Some(amount),
            None => match (side(self.debit), side(self.credit)) {
                (Some(debit), _) => {
                    label.get_or_insert_with(|| "debit".to_string());
                    Some(debit)
                }
                (None, Some(credit)) => {
                    label.get_or_insert_with(|| "credit".to_string());
                    Some(credit)
                }
                (None, None) => None,
            },
        };
        if let Some(amount) = amount {
            row.insert("amount".into(), Value::String(amount));
        }
        if let Some(label) = label {
            row.insert("type".into(), Value::String(label));
        }
        if let Some(reference) = get(self.reference) {
            row.insert("reference".into(), Value::String(reference));
        }

        Value::Object(row)
    }
}

/// Whether a file should be treated as a CSV export
pub fn is_csv_file(file_name: &str) -> bool {
    file_name.to_lowercase().ends_with(".csv")
}

/// Parse a CSV statement export.
///
/// Returns `Ok(None)` when the header row is not recognized, so the caller
/// can fall back to OCR.
pub fn parse_csv_statement(data: &[u8]) -> Result<Option<ExtractionResult>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = rdr.headers()?.clone();
    let Some(columns) = ColumnMap::from_headers(headers.iter()) else {
        return Ok(None);
    };

    let mut transactions = Vec::new();
    for result in rdr.records() {
        let record: StringRecord = result?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        transactions.push(columns.row(|i| record.get(i).map(str::to_string)));
    }

    Ok(Some(ExtractionResult {
        transactions,
        balances: Balances::default(),
        account_number: None,
        bank_name: None,
        statement_period: None,
    }))
}

fn split_table_row(line: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if !line.starts_with('|') {
        return None;
    }
    let inner = line.trim_start_matches('|').trim_end_matches('|');
    Some(inner.split('|').map(|c| c.trim().to_string()).collect())
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
        })
}

/// Parse transaction rows from markdown pipe tables in OCR text.
///
/// Every table whose header maps to date, description and amount columns
/// contributes rows, so statements split across pages are read in full.
/// Returns `None` when no such table exists.
pub fn parse_markdown_tables(markdown: &str) -> Option<ExtractionResult> {
    let mut transactions = Vec::new();
    let mut found_table = false;
    let mut lines = markdown.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(header) = split_table_row(line) else {
            continue;
        };
        let separator = lines.peek().and_then(|next| split_table_row(next));
        if !separator.map(|s| is_separator_row(&s)).unwrap_or(false) {
            continue;
        }
        lines.next();

        let Some(columns) = ColumnMap::from_headers(header.iter().map(String::as_str)) else {
            continue;
        };
        found_table = true;

        while let Some(cells) = lines.peek().and_then(|next| split_table_row(next)) {
            lines.next();
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            transactions.push(columns.row(|i| cells.get(i).cloned()));
        }
    }

    if !found_table {
        return None;
    }

    Some(ExtractionResult {
        transactions,
        balances: find_balance_lines(markdown),
        account_number: None,
        bank_name: None,
        statement_period: None,
    })
}

fn balance_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[\s|*#]*(opening|beginning|previous|closing|ending|new)\s+balance\b[^0-9(\-$]*(-?\$?\(?-?[\d,]+\.\d{2}\)?)",
        )
        .expect("valid regex")
    })
}

/// Find printed opening and closing balance lines.
///
/// A closing balance found this way is a statement line, which the
/// reconciler trusts. The last match of each kind wins.
pub fn find_balance_lines(text: &str) -> Balances {
    let mut balances = Balances::default();

    for caps in balance_regex().captures_iter(text) {
        let kind = caps[1].to_lowercase();
        let Ok((value, _)) = parse_amount(&caps[2]) else {
            continue;
        };
        match kind.as_str() {
            "opening" | "beginning" | "previous" => balances.opening = Some(value),
            _ => balances.closing = Some(value),
        }
    }

    if balances.closing.is_some() {
        balances.source = BalanceSource::StatementLine;
    }
    balances
}
