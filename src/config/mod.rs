//! Configuration module for the S3 content gateway
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every section is optional
//! and falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static::lazy_static! {
    static ref ENV_VAR: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
            .expect("env var pattern is valid");
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// ```ignore
/// std::env::set_var("DATA_DIR", "/var/lib/gateway");
/// assert_eq!(expand_env_vars("${DATA_DIR}/x"), "/var/lib/gateway/x");
/// assert_eq!(expand_env_vars("${MISSING:-fallback}"), "fallback");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default: keep the placeholder
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid server address '{}'",
                self.server.address
            )));
        }
        if self.s3.connect_timeout_seconds == 0 || self.s3.read_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "S3 timeouts must be greater than zero".into(),
            ));
        }
        if self.usage.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "usage.interval_seconds must be greater than zero".into(),
            ));
        }
        if self.usage.max_count == 0 {
            return Err(ConfigError::ValidationError(
                "usage.max_count must be greater than zero".into(),
            ));
        }
        // S3 parts other than the last must be at least 5 MiB
        if self.upload.segment_size < MIN_SEGMENT_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "upload.segment_size must be at least {} bytes",
                MIN_SEGMENT_SIZE
            )));
        }
        if self.datastore.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "datastore.path cannot be empty".into(),
            ));
        }
        if self.metrics.enabled
            && self.metrics.address.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid metrics address '{}'",
                self.metrics.address
            )));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Process-wide S3 transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
    /// Log one line per S3 call
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

impl S3Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
            log_requests: true,
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Usage limit: at most `max_count` requests per `interval_seconds`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    #[serde(default = "default_usage_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_usage_max_count")]
    pub max_count: u64,
}

impl UsageConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_usage_interval(),
            max_count: default_usage_max_count(),
        }
    }
}

fn default_usage_interval() -> u64 {
    10
}

fn default_usage_max_count() -> u64 {
    1000
}

/// Smallest segment size S3 accepts for non-final parts
pub const MIN_SEGMENT_SIZE: u64 = 5 * 1024 * 1024;

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Segment size suggested to clients at sign-in
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            segment_size: default_segment_size(),
        }
    }
}

fn default_segment_size() -> u64 {
    104857600 // 100MB
}

/// Registration datastore location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    #[serde(default = "default_datastore_path")]
    pub path: PathBuf,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            path: default_datastore_path(),
        }
    }
}

fn default_datastore_path() -> PathBuf {
    PathBuf::from("./data")
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}
