//! Service configuration module.
//!
//! Handles loading, validating, and merging the `thumbdrop.toml` file. Stock
//! defaults are serialized to a TOML table and the user file is merged on top,
//! key by key, so a config file only needs the values it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [limits]
//! max_upload_bytes = 10485760   # Reject larger payloads (10 MiB)
//! max_target_width = 10000      # Dimension-mode widths are clamped to this
//!
//! [optimizer]
//! optimize_floor_bytes = 1048576  # Below this the original is reused as thumbnail
//! dimension_quality = 80          # JPEG quality for dimension mode
//! max_quality = 90                # Size mode: starting (and highest) quality
//! min_quality = 60                # Size mode: quality floor before shrinking width
//! quality_step = 5
//! max_width = 1600                # Size mode: starting width ceiling
//! min_width = 400                 # Size mode: width floor
//! shrink_ratio = 0.8
//! tolerance = 0.1                 # Accept sizes within ±10% of the target
//! max_attempts = 8
//!
//! [staging]
//! # dir = "/var/tmp/thumbdrop"   # Omit for <OS temp dir>/thumbdrop-uploads
//! cleanup_on_success = true
//!
//! [remote]
//! root = "remote"               # Root of the directory-tree remote store
//! transfer_timeout_secs = 30
//!
//! [processing]
//! max_processes = 4             # Max codec workers (omit for auto = CPU cores)
//! max_uploads = 8               # Max uploads in flight per batch (omit for = codec workers)
//!
//! [logging]
//! level = "info"                # Overridden by RUST_LOG when set
//! format = "pretty"             # or "json"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Service configuration loaded from `thumbdrop.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Request-level limits.
    pub limits: LimitsConfig,
    /// Thumbnail search parameters.
    pub optimizer: OptimizerConfig,
    /// Local scratch storage.
    pub staging: StagingConfig,
    /// Remote store location and transfer timeout.
    pub remote: RemoteConfig,
    /// Codec pool and batch concurrency.
    pub processing: ProcessingConfig,
    /// Log level and format.
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let o = &self.optimizer;
        for (name, q) in [
            ("dimension_quality", o.dimension_quality),
            ("max_quality", o.max_quality),
            ("min_quality", o.min_quality),
        ] {
            if !(1..=100).contains(&q) {
                return Err(ConfigError::Validation(format!(
                    "optimizer.{name} must be 1-100"
                )));
            }
        }
        if o.min_quality > o.max_quality {
            return Err(ConfigError::Validation(
                "optimizer.min_quality must not exceed max_quality".into(),
            ));
        }
        if o.quality_step == 0 {
            return Err(ConfigError::Validation(
                "optimizer.quality_step must be non-zero".into(),
            ));
        }
        if o.min_width == 0 || o.min_width > o.max_width {
            return Err(ConfigError::Validation(
                "optimizer.min_width must be non-zero and not exceed max_width".into(),
            ));
        }
        if !(o.shrink_ratio > 0.0 && o.shrink_ratio < 1.0) {
            return Err(ConfigError::Validation(
                "optimizer.shrink_ratio must be between 0 and 1".into(),
            ));
        }
        if !(o.tolerance > 0.0 && o.tolerance < 1.0) {
            return Err(ConfigError::Validation(
                "optimizer.tolerance must be between 0 and 1".into(),
            ));
        }
        if o.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "optimizer.max_attempts must be at least 1".into(),
            ));
        }
        if self.limits.max_target_width == 0 || self.limits.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "limits values must be non-zero".into(),
            ));
        }
        if self.processing.max_uploads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_uploads must be at least 1".into(),
            ));
        }
        if self.remote.transfer_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.transfer_timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Request-level limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest accepted upload payload, in bytes.
    pub max_upload_bytes: u64,
    /// Dimension-mode target widths above this are clamped down.
    pub max_target_width: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            max_target_width: 10_000,
        }
    }
}

/// Thumbnail search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Inputs smaller than this are reused verbatim as their own thumbnail.
    pub optimize_floor_bytes: u64,
    /// JPEG quality for dimension-mode thumbnails.
    pub dimension_quality: u32,
    /// Size mode: starting quality and ceiling when raising.
    pub max_quality: u32,
    /// Size mode: quality floor; below it the width shrinks instead.
    pub min_quality: u32,
    /// Size mode: quality change per attempt.
    pub quality_step: u32,
    /// Size mode: starting width ceiling.
    pub max_width: u32,
    /// Size mode: width floor.
    pub min_width: u32,
    /// Size mode: width multiplier once quality is at the floor.
    pub shrink_ratio: f64,
    /// Accepted relative distance from the byte target.
    pub tolerance: f64,
    /// Hard cap on encode attempts.
    pub max_attempts: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimize_floor_bytes: 1024 * 1024,
            dimension_quality: 80,
            max_quality: 90,
            min_quality: 60,
            quality_step: 5,
            max_width: 1600,
            min_width: 400,
            shrink_ratio: 0.8,
            tolerance: 0.1,
            max_attempts: 8,
        }
    }
}

/// Local scratch storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StagingConfig {
    /// Scratch root. When absent, `<OS temp dir>/thumbdrop-uploads`.
    pub dir: Option<PathBuf>,
    /// Delete staged files once both artifacts are published.
    pub cleanup_on_success: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            cleanup_on_success: true,
        }
    }
}

impl StagingConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("thumbdrop-uploads"))
    }
}

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Root directory of the remote tree.
    pub root: PathBuf,
    /// Per-transfer timeout in seconds.
    pub transfer_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("remote"),
            transfer_timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

/// Codec pool and batch concurrency.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of codec workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
    /// Maximum number of uploads a batch runs at once. Each one holds a
    /// payload in memory and a remote session open.
    /// When absent, matches the codec worker count.
    pub max_uploads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Resolve how many uploads a batch may run concurrently.
///
/// Not clamped to the core count: uploads spend most of their time waiting
/// on the remote store.
pub fn effective_upload_workers(config: &ProcessingConfig) -> usize {
    config
        .max_uploads
        .map(|n| n.max(1))
        .unwrap_or_else(|| effective_threads(config))
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
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

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(ServiceConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
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
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
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
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given file path.
///
/// A missing file yields the stock defaults. Otherwise user values are merged
/// on top of the defaults, unknown keys rejected, and the result validated.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `thumbdrop.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Thumbdrop Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Request limits
# ---------------------------------------------------------------------------
[limits]
# Largest accepted upload, in bytes (10 MiB).
max_upload_bytes = 10485760

# Dimension-mode target widths above this are clamped down.
max_target_width = 10000

# ---------------------------------------------------------------------------
# Thumbnail optimizer
# ---------------------------------------------------------------------------
[optimizer]
# Uploads smaller than this are reused byte-for-byte as their own thumbnail.
optimize_floor_bytes = 1048576

# JPEG quality for "dimension" mode thumbnails.
dimension_quality = 80

# "size" mode starts at max_quality and steps down by quality_step until
# min_quality, then shrinks the width by shrink_ratio down to min_width.
max_quality = 90
min_quality = 60
quality_step = 5
max_width = 1600
min_width = 400
shrink_ratio = 0.8

# Accept a thumbnail within this fraction of the byte target.
tolerance = 0.1

# Hard cap on encode attempts; the last buffer is kept if none fits.
max_attempts = 8

# ---------------------------------------------------------------------------
# Local staging
# ---------------------------------------------------------------------------
[staging]
# Scratch directory. Omit to use <OS temp dir>/thumbdrop-uploads.
# dir = "/var/tmp/thumbdrop"

# Delete staged files after both artifacts are published.
cleanup_on_success = true

# ---------------------------------------------------------------------------
# Remote store
# ---------------------------------------------------------------------------
[remote]
# Root directory of the remote tree (a mounted share or synced folder).
root = "remote"

# Seconds to wait for each file transfer before failing the upload.
transfer_timeout_secs = 30

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel codec workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# Maximum uploads in flight during a batch. Each holds its payload in memory
# and one remote session. Omit to match max_processes.
# max_uploads = 8

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# Default filter when RUST_LOG is not set.
level = "info"

# "pretty" for humans, "json" for log shippers.
format = "pretty"
"##
}
