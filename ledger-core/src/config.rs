//! Configuration for the ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Emit logs as JSON lines
    pub log_json: bool,

    /// Bounded capacity of the single-writer mailbox
    pub mailbox_capacity: usize,

    /// Tag marking a soft-deleted record
    pub deletion_tag: String,

    /// RocksDB configuration
    pub store: StoreConfig,

    /// Draft validation limits
    pub validation: ValidationConfig,

    /// Anomaly scanner thresholds
    pub anomaly: AnomalyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "spendwise-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_json: false,
            mailbox_capacity: 1000,
            deletion_tag: "deleted".to_string(),
            store: StoreConfig::default(),
            validation: ValidationConfig::default(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Limits applied to drafts and updates before they reach the chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Largest accepted amount (inclusive)
    pub max_amount: Decimal,

    /// Longest accepted category id (characters)
    pub max_category_len: usize,

    /// Longest accepted note (characters)
    pub max_note_len: usize,

    /// Most tags per record
    pub max_tags: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_amount: Decimal::new(10_000_000, 0),
            max_category_len: 50,
            max_note_len: 500,
            max_tags: 10,
        }
    }
}

/// Anomaly scanner thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// How far ahead of "now" a timestamp may be (ms)
    pub future_tolerance_ms: i64,

    /// How far behind its predecessor a timestamp may be (ms)
    pub regression_tolerance_ms: i64,

    /// Amounts above this are flagged
    pub large_amount_threshold: Decimal,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            future_tolerance_ms: 60_000,       // 1 minute
            regression_tolerance_ms: 300_000,  // 5 minutes
            large_amount_threshold: Decimal::new(10_000_000, 0),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(capacity) = std::env::var("LEDGER_MAILBOX_CAPACITY") {
            config.mailbox_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_MAILBOX_CAPACITY: {}", e))
            })?;
        }

        if let Ok(json) = std::env::var("LEDGER_LOG_JSON") {
            config.log_json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be greater than zero".to_string(),
            ));
        }
        if self.deletion_tag.is_empty() {
            return Err(crate::Error::Config(
                "deletion_tag must not be empty".to_string(),
            ));
        }
        if self.validation.max_amount <= Decimal::ZERO {
            return Err(crate::Error::Config(
                "validation.max_amount must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "spendwise-ledger");
        assert_eq!(config.mailbox_capacity, 1000);
        assert_eq!(config.deletion_tag, "deleted");
        assert_eq!(config.anomaly.future_tolerance_ms, 60_000);
        assert_eq!(config.anomaly.regression_tolerance_ms, 300_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/ledger-test"
mailbox_capacity = 16

[anomaly]
future_tolerance_ms = 1000
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger-test"));
        assert_eq!(config.mailbox_capacity, 16);
        assert_eq!(config.anomaly.future_tolerance_ms, 1000);
        // Untouched fields keep their defaults
        assert_eq!(config.anomaly.regression_tolerance_ms, 300_000);
        assert_eq!(config.validation.max_tags, 10);
    }

    #[test]
    fn test_from_file_rejects_zero_capacity() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "mailbox_capacity = 0\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "mailbox_capacity = \"many\"\n").unwrap();

        assert!(matches!(
            Config::from_file(&path).unwrap_err(),
            crate::Error::Config(_)
        ));
    }
}
