//! Runtime configuration.
//!
//! A single JSON document with defaulted sections. Everything has a
//! sensible default so `Config::default()` is a fully working setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database path. `None` uses `default_database_path()`.
    pub database_path: Option<PathBuf>,
    /// Root directory of the filesystem object store.
    pub storage_root: PathBuf,
    /// Number of extraction worker threads.
    pub worker_count: usize,
    /// Default search expression for candidate listing.
    pub candidate_query: String,
    /// Label applied to source messages after successful processing.
    pub label_name: String,
    pub ocr: OcrConfig,
    pub retry: RetryConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    pub enabled: bool,
    pub languages: Vec<String>,
    pub dpi: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts for transient failures (first try included).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Similarity score at or above which a match is assigned unattended.
    pub auto_match_threshold: u8,
    /// Similarity score at or above which a candidate is suggested.
    pub suggest_threshold: u8,
    /// Maximum suggestions recorded per entity kind.
    pub max_suggestions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            storage_root: PathBuf::from("data/objects"),
            worker_count: num_cpus::get().clamp(1, 4),
            candidate_query: "has:attachment subject:(invoice OR receipt OR bill)".to_string(),
            label_name: "processed".to_string(),
            ocr: OcrConfig::default(),
            retry: RetryConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: vec!["eng".to_string()],
            dpi: 300,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: 90,
            suggest_threshold: 60,
            max_suggestions: 3,
        }
    }
}

impl Config {
    /// Validates cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Validation {
                message: "worker_count must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        if self.reconcile.auto_match_threshold > 100 {
            return Err(ConfigError::Validation {
                message: "reconcile.auto_match_threshold must be <= 100".to_string(),
            });
        }
        if self.reconcile.suggest_threshold > self.reconcile.auto_match_threshold {
            return Err(ConfigError::Validation {
                message: "reconcile.suggest_threshold must not exceed auto_match_threshold"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Loads and validates a config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&raw)?;
    config.validate()?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Returns the canonical database path: `~/.invex/data/invex.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".invex").join("data").join("invex.db"))
}
