//! Transaction normalization
//!
//! Turns validated rows into signed, typed transactions:
//!
//! 1. The bank label picks a direction from the label table. Missing or
//!    unknown labels fall back to the amount's sign.
//! 2. An explicitly signed amount that disagrees with its label is corrected
//!    to the label and recorded. Unsigned magnitudes take the label's sign.
//! 3. Reclassification rules flip the type when the description says so
//!    (an "expense" reading `DEPOSIT REF 123` becomes income).
//!
//! Zero amounts cannot satisfy the sign invariant and are rejected.
//!
//! ## Configuration Resolution
//!
//! 1. `TALLY_RECLASSIFY_RULES` path, if set
//! 2. Override in data dir (~/.local/share/tally/config/reclassify.toml)
//! 3. Embedded defaults (compiled into binary)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::extract::RawTransaction;
use crate::models::{
    NormalizedTransaction, Reclassification, RowError, SignCorrection, TransactionType,
};

/// Embedded default rules (compiled into binary)
const DEFAULT_RULES: &str = include_str!("../../../config/reclassify.toml");

#[derive(Debug, Deserialize)]
struct RawRules {
    #[serde(default)]
    labels: RawLabels,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLabels {
    #[serde(default)]
    inflow: Vec<String>,
    #[serde(default)]
    outflow: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    phrase: String,
    #[serde(rename = "type")]
    to_type: TransactionType,
    #[serde(default)]
    unless: Vec<String>,
}

/// Case-insensitive, word-boundary phrase matcher
fn phrase_regex(phrase: &str) -> Result<Regex> {
    let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return Err(Error::Config("reclassification phrase is empty".into()));
    }
    Ok(Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+")))?)
}

/// A description rule that moves a row to `to_type`
#[derive(Debug, Clone)]
pub struct ReclassificationRule {
    pub phrase: String,
    pub to_type: TransactionType,
    pattern: Regex,
    unless: Vec<Regex>,
}

impl ReclassificationRule {
    pub fn new(phrase: &str, to_type: TransactionType, unless: &[&str]) -> Result<Self> {
        Ok(Self {
            phrase: phrase.to_string(),
            to_type,
            pattern: phrase_regex(phrase)?,
            unless: unless
                .iter()
                .map(|u| phrase_regex(u))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub fn matches(&self, description: &str) -> bool {
        self.pattern.is_match(description) && !self.unless.iter().any(|u| u.is_match(description))
    }
}

/// Result of normalizing one row
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub transaction: NormalizedTransaction,
    pub reclassification: Option<Reclassification>,
    pub sign_correction: Option<SignCorrection>,
    pub type_inferred_from_sign: bool,
}

/// Result of normalizing a whole statement
#[derive(Debug, Clone, Default)]
pub struct NormalizationOutput {
    /// Normalized rows with their index in the extracted document
    pub transactions: Vec<(usize, NormalizedTransaction)>,
    pub reclassifications: Vec<Reclassification>,
    pub sign_corrections: Vec<SignCorrection>,
    pub inferred_type_rows: Vec<usize>,
    pub row_errors: Vec<RowError>,
}

/// Label table and reclassification rules
#[derive(Debug, Clone)]
pub struct Normalizer {
    labels: HashMap<String, TransactionType>,
    rules: Vec<ReclassificationRule>,
}

impl Normalizer {
    /// Load rules using the standard resolution order
    pub fn new() -> Result<Self> {
        let override_path = std::env::var("TALLY_RECLASSIFY_RULES")
            .ok()
            .map(PathBuf::from)
            .or_else(default_rules_path);

        match override_path {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Self::from_toml_str(DEFAULT_RULES),
        }
    }

    /// Load rules from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded reclassification rules");
        Self::from_toml_str(&content)
    }

    /// Parse rules from TOML content
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawRules = toml::from_str(content)?;

        let mut labels = HashMap::new();
        for label in raw.labels.inflow {
            labels.insert(label.trim().to_lowercase(), TransactionType::Income);
        }
        for label in raw.labels.outflow {
            labels.insert(label.trim().to_lowercase(), TransactionType::Expense);
        }

        let rules = raw
            .rules
            .iter()
            .map(|r| {
                let unless: Vec<&str> = r.unless.iter().map(String::as_str).collect();
                ReclassificationRule::new(&r.phrase, r.to_type, &unless)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { labels, rules })
    }

    pub fn rules(&self) -> &[ReclassificationRule] {
        &self.rules
    }

    /// Direction a bank label implies, if the label is known
    pub fn label_direction(&self, label: &str) -> Option<TransactionType> {
        self.labels.get(&label.trim().to_lowercase()).copied()
    }

    /// Normalize one validated row
    pub fn normalize(&self, row_index: usize, raw: &RawTransaction) -> Result<Normalized> {
        if raw.amount == 0.0 {
            return Err(Error::Normalization(format!(
                "row {} has a zero amount",
                row_index
            )));
        }

        let labelled = raw.label.as_deref().and_then(|l| self.label_direction(l));
        let type_inferred_from_sign = labelled.is_none();
        let label_type = labelled.unwrap_or(if raw.amount > 0.0 {
            TransactionType::Income
        } else {
            TransactionType::Expense
        });

        let mut sign_correction = None;
        if raw.explicitly_signed && !label_type.agrees_with(raw.amount) {
            sign_correction = Some(SignCorrection {
                row_index,
                description: raw.description.clone(),
                label: raw.label.clone(),
                original_amount: raw.amount,
                amount: label_type.signed(raw.amount),
            });
        }

        let mut transaction_type = label_type;
        let mut amount = label_type.signed(raw.amount);
        let mut reclassification = None;

        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.to_type != transaction_type && r.matches(&raw.description))
        {
            let new_amount = rule.to_type.signed(amount);
            reclassification = Some(Reclassification {
                row_index,
                description: raw.description.clone(),
                from_type: transaction_type,
                to_type: rule.to_type,
                original_amount: amount,
                amount: new_amount,
                matched_phrase: rule.phrase.clone(),
            });
            transaction_type = rule.to_type;
            amount = new_amount;
        }

        Ok(Normalized {
            transaction: NormalizedTransaction {
                date: raw.date,
                description: raw.description.clone(),
                amount,
                transaction_type,
                transaction_reference: raw.reference.clone(),
            },
            reclassification,
            sign_correction,
            type_inferred_from_sign,
        })
    }

    /// Normalize every row, collecting audit records and row errors
    pub fn normalize_all(&self, rows: &[(usize, RawTransaction)]) -> NormalizationOutput {
        let mut output = NormalizationOutput::default();

        for (row_index, raw) in rows {
            match self.normalize(*row_index, raw) {
                Ok(normalized) => {
                    if let Some(r) = normalized.reclassification {
                        output.reclassifications.push(r);
                    }
                    if let Some(c) = normalized.sign_correction {
                        output.sign_corrections.push(c);
                    }
                    if normalized.type_inferred_from_sign {
                        output.inferred_type_rows.push(*row_index);
                    }
                    output.transactions.push((*row_index, normalized.transaction));
                }
                Err(e) => output.row_errors.push(RowError {
                    row_index: *row_index,
                    reason: e.to_string(),
                }),
            }
        }

        output
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to embedded reclassification rules");
            Self::builtin()
        })
    }
}

impl Normalizer {
    fn builtin() -> Self {
        Self::from_toml_str(DEFAULT_RULES).unwrap_or(Self {
            labels: HashMap::new(),
            rules: Vec::new(),
        })
    }
}

/// Default rules override path
pub fn default_rules_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("reclassify.toml"))
}
