//! Runtime configuration
//!
//! Resolution order, later wins:
//! 1. Built-in defaults
//! 2. TOML file at `TALLY_CONFIG`, or ~/.local/share/tally/config/tally.toml
//! 3. Environment variables
//!
//! ```toml
//! storage_dir = "/var/lib/tally/statements"
//! rate_limit_per_hour = 10
//! rate_refresh_secs = 60
//! reclassify_rules = "/etc/tally/reclassify.toml"
//! api_keys = ["operator-key"]
//! ```
//!
//! OCR and extractor backends are configured separately through their own
//! environment variables (see `crate::ocr` and `crate::extract`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::normalize::Normalizer;
use crate::rate_limit::DEFAULT_LIMIT_PER_HOUR;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Root directory of the local object store
    pub storage_dir: PathBuf,
    pub rate_limit_per_hour: i64,
    /// Interval of the rate-window refresh task
    pub rate_refresh_secs: u64,
    /// Reclassification rule file (embedded defaults when unset)
    pub reclassify_rules: Option<PathBuf>,
    /// Operator API keys for purge and other privileged endpoints
    pub api_keys: Vec<String>,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_data_dir().join("statements"),
            rate_limit_per_hour: DEFAULT_LIMIT_PER_HOUR,
            rate_refresh_secs: 60,
            reclassify_rules: None,
            api_keys: Vec::new(),
        }
    }
}

/// Data directory for Tally (~/.local/share/tally)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tally")
}

/// Default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("tally").join("config").join("tally.toml"))
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(name, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

impl TallyConfig {
    /// Load configuration using the standard resolution order
    pub fn load() -> Result<Self> {
        let path = std::env::var("TALLY_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("TALLY_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(limit) = parse_env::<i64>("TALLY_RATE_LIMIT_PER_HOUR") {
            if limit > 0 {
                self.rate_limit_per_hour = limit;
            }
        }
        if let Some(secs) = parse_env::<u64>("TALLY_RATE_REFRESH_SECS") {
            if secs > 0 {
                self.rate_refresh_secs = secs;
            }
        }
        if let Ok(path) = std::env::var("TALLY_RECLASSIFY_RULES") {
            self.reclassify_rules = Some(PathBuf::from(path));
        }
        if let Ok(keys) = std::env::var("TALLY_API_KEYS") {
            self.api_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limit_per_hour <= 0 {
            return Err(Error::Config("rate_limit_per_hour must be positive".into()));
        }
        if self.rate_refresh_secs == 0 {
            return Err(Error::Config("rate_refresh_secs must be positive".into()));
        }
        Ok(())
    }

    /// Build the normalizer this configuration selects
    pub fn normalizer(&self) -> Result<Normalizer> {
        match self.reclassify_rules {
            Some(ref path) => Normalizer::from_file(path),
            None => Normalizer::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TallyConfig::default();
        assert_eq!(config.rate_limit_per_hour, 10);
        assert_eq!(config.rate_refresh_secs, 60);
        assert!(config.api_keys.is_empty());
        assert!(config.storage_dir.ends_with("statements"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TallyConfig::from_toml_str("rate_limit_per_hour = 3\n").unwrap();
        assert_eq!(config.rate_limit_per_hour, 3);
        assert_eq!(config.rate_refresh_secs, 60);
    }

    #[test]
    fn test_invalid_toml_values() {
        assert!(TallyConfig::from_toml_str("rate_limit_per_hour = 0\n").is_err());
        assert!(TallyConfig::from_toml_str("rate_limit_per_hour = \"ten\"\n").is_err());
    }

    #[test]
    fn test_normalizer_from_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, "[[rules]]\nphrase = \"CASHBACK\"\ntype = \"income\"\n").unwrap();

        let config = TallyConfig {
            reclassify_rules: Some(path),
            ..TallyConfig::default()
        };
        let normalizer = config.normalizer().unwrap();
        assert_eq!(normalizer.rules().len(), 1);
    }
}
