//! Service configuration module.
//!
//! Handles loading, validating, and merging `henkan.toml`. Stock defaults are
//! serialized to a TOML table and the user file is merged on top, so a config
//! file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! data_dir = "data"          # Object store root and record file location
//!
//! [storage]
//! bucket = "images"
//! raw_prefix = "raw-images"
//! transformed_prefix = "transformed-images"
//!
//! [processing]
//! max_processes = 4          # Max parallel jobs (omit for auto = CPU cores)
//! timeout_secs = 30          # Per-job deadline (omit for none)
//! max_attempts = 3           # Deliveries before a retryable failure is final
//!
//! [fetch]
//! allowed_mime_types = ["image/jpeg", "image/png", "image/gif"]
//! request_timeout_secs = 30  # Whole-request limit for http(s) sources
//!
//! [logging]
//! level = "info"             # RUST_LOG wins when set
//! format = "pretty"          # or "json"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "henkan.toml";

/// File name of the JSON record store inside `data_dir`.
pub const RECORDS_FILE: &str = "images.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `henkan.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Root directory for stored objects and the record file.
    pub data_dir: String,
    pub storage: StorageConfig,
    pub processing: ProcessingConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            storage: StorageConfig::default(),
            processing: ProcessingConfig::default(),
            fetch: FetchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.data_dir.trim().is_empty() {
            return Err(SettingsError::Validation(
                "data_dir must not be empty".into(),
            ));
        }
        self.storage.validate()?;
        self.processing.validate()?;
        self.fetch.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Where the JSON record store lives.
    pub fn records_path(&self) -> PathBuf {
        self.data_path().join(RECORDS_FILE)
    }
}

/// Object store layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub bucket: String,
    /// Key prefix for fetched source bytes.
    pub raw_prefix: String,
    /// Key prefix for pipeline output.
    pub transformed_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "images".to_string(),
            raw_prefix: "raw-images".to_string(),
            transformed_prefix: "transformed-images".to_string(),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<(), SettingsError> {
        for (field, value) in [
            ("storage.bucket", &self.bucket),
            ("storage.raw_prefix", &self.raw_prefix),
            ("storage.transformed_prefix", &self.transformed_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(SettingsError::Validation(format!(
                    "{field} must not be empty"
                )));
            }
            if value.split('/').any(|part| part == "..") {
                return Err(SettingsError::Validation(format!(
                    "{field} must not contain `..`"
                )));
            }
        }
        if self.raw_prefix == self.transformed_prefix {
            return Err(SettingsError::Validation(
                "storage.raw_prefix and storage.transformed_prefix must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn raw_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.raw_prefix, file_name)
    }

    pub fn transformed_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.transformed_prefix, file_name)
    }
}

/// Parallel processing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of jobs processed in parallel.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
    /// Per-job deadline in seconds. Absent means no deadline.
    pub timeout_secs: Option<u64>,
    /// Total deliveries of a job whose failure is retryable.
    pub max_attempts: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processes: None,
            timeout_secs: None,
            max_attempts: 3,
        }
    }
}

impl ProcessingConfig {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.max_processes == Some(0) {
            return Err(SettingsError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(SettingsError::Validation(
                "processing.timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SettingsError::Validation(
                "processing.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Source fetching rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// MIME types accepted from a source; anything else fails the job.
    pub allowed_mime_types: Vec<String>,
    /// Limit for one HTTP source download, connect to last byte.
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/gif".to_string(),
            ],
            request_timeout_secs: 30,
        }
    }
}

impl FetchConfig {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.allowed_mime_types.is_empty() {
            return Err(SettingsError::Validation(
                "fetch.allowed_mime_types must not be empty".into(),
            ));
        }
        if let Some(bad) = self
            .allowed_mime_types
            .iter()
            .find(|m| !m.starts_with("image/"))
        {
            return Err(SettingsError::Validation(format!(
                "fetch.allowed_mime_types entries must be image types, got {bad:?}"
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(SettingsError::Validation(
                "fetch.request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime_type))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LoggingConfig {
    fn validate(&self) -> Result<(), SettingsError> {
        let level = self.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(SettingsError::Validation(format!(
                "logging.level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.level
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServiceConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, SettingsError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to stock defaults when it is absent.
pub fn load_config(path: &Path) -> Result<ServiceConfig, SettingsError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `henkan.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Henkan Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Root directory for stored objects and the image record file (images.json).
data_dir = "data"

# ---------------------------------------------------------------------------
# Object storage
# ---------------------------------------------------------------------------
[storage]
# Bucket directory under data_dir.
bucket = "images"

# Key prefix for source bytes as fetched.
raw_prefix = "raw-images"

# Key prefix for transformed output.
transformed_prefix = "transformed-images"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum jobs processed in parallel.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# Per-job deadline in seconds. A job past its deadline is cancelled between
# steps and retried. Omit for no deadline.
# timeout_secs = 30

# Deliveries of a job before a retryable failure marks the image failed.
max_attempts = 3

# ---------------------------------------------------------------------------
# Source fetching
# ---------------------------------------------------------------------------
[fetch]
# Source MIME types accepted for processing.
allowed_mime_types = ["image/jpeg", "image/png", "image/gif"]

# Seconds allowed for one http(s) source download. Timeouts are retried.
request_timeout_secs = 30

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# Default level: trace, debug, info, warn, error. RUST_LOG overrides it.
level = "info"

# Output format: "pretty" for terminals, "json" for log collectors.
format = "pretty"
"##
}
