//! Configuration loading for sync-router.
//!
//! Configuration is loaded from a TOML file (default: `router.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for sync-router.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Session reconciliation configuration.
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Event log configuration.
    #[serde(default)]
    pub event_log: EventLogConfig,
    /// Data model persistence configuration.
    #[serde(default)]
    pub model: ModelConfig,
    /// Session registry configuration.
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeats (default: 60).
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Enable the heartbeat (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Session reconciliation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Tokens per validation request (default: 1000).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Lower bound of the pause between chunks in milliseconds (default: 250).
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Upper bound of the pause between chunks in milliseconds (default: 1500).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

/// Event log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventLogConfig {
    /// Events retained for replay. Zero keeps no history (default: 0).
    #[serde(default)]
    pub capacity: usize,
}

/// Data model persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// File the data model is saved to and loaded from.
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// Seconds between saves (default: 60).
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
    /// Enable periodic saving (default: true).
    #[serde(default = "default_true")]
    pub save_enabled: bool,
}

/// Session registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// How long a lookup waits for a session to propagate, in ms (default: 5000).
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// How long removed network sessions are remembered (default: 300).
    #[serde(default = "default_tombstone_retention")]
    pub tombstone_retention_secs: u64,
    /// Seconds between tombstone sweeps (default: 60).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Accept self-contained bearer tokens as API sessions (default: false).
    #[serde(default)]
    pub ha_enabled: bool,
    /// Audience bearer tokens must name (default: "openziti").
    #[serde(default = "default_audience")]
    pub expected_audience: String,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 127.0.0.1:8081).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Serve health, metrics and debug endpoints (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    1000
}

fn default_min_interval_ms() -> u64 {
    250
}

fn default_max_interval_ms() -> u64 {
    1500
}

fn default_model_path() -> PathBuf {
    PathBuf::from("router-data-model.mpk")
}

fn default_save_interval() -> u64 {
    60
}

fn default_lookup_timeout_ms() -> u64 {
    5000
}

fn default_tombstone_retention() -> u64 {
    5 * 60 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_audience() -> String {
    "openziti".to_string()
}

fn default_http_bind() -> String {
    "127.0.0.1:8081".to_string()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            enabled: true,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { capacity: 0 }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            save_interval_secs: default_save_interval(),
            save_enabled: true,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout_ms(),
            tombstone_retention_secs: default_tombstone_retention(),
            sweep_interval_secs: default_sweep_interval(),
            ha_enabled: false,
            expected_audience: default_audience(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            enabled: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            validation: ValidationConfig::default(),
            event_log: EventLogConfig::default(),
            model: ModelConfig::default(),
            sessions: SessionsConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl ValidationConfig {
    /// Lower bound of the pause between chunks.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Upper bound of the pause between chunks.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl SessionsConfig {
    /// Session lookup deadline.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Tombstone retention window.
    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
