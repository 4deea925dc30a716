//! Configuration for the SunSpec exporter.
//!
//! Settings come from an optional JSON5 file, then environment variables:
//!
//! | Variable          | Default       |
//! |-------------------|---------------|
//! | `TARGET_IP`       | `192.168.1.6` |
//! | `TARGET_PORT`     | `502`         |
//! | `UNIT_ID`         | `1`           |
//! | `LISTEN_PORT`     | `8080`        |
//! | `SCRAPE_INTERVAL` | `1` (seconds) |
//! | `LOG_LEVEL`       | `info`        |
//! | `LOG_FORMAT`      | `text`        |

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::path::Path;
use std::time::Duration;
use sunspec_common::{EnvFallback, EnvOverlay, EnvSource, LogFormat, LoggingConfig};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] sunspec_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Device connection settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// HTTP listener settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Polling settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SunSpec device reachable over Modbus/TCP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Host address (IP or hostname)
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> String {
    "192.168.1.6".to_string()
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// HTTP metrics endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port to listen on (all interfaces)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Path serving the metrics snapshot
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

fn default_listen_port() -> u16 {
    8080
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            metrics_path: default_metrics_path(),
        }
    }
}

/// Polling and reconnect timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between poll cycles in seconds
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Fixed delay before reconnecting after a failure, in seconds
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
}

fn default_scrape_interval() -> u64 {
    1
}

fn default_backoff() -> u64 {
    1
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            scrape_interval_secs: default_scrape_interval(),
            backoff_secs: default_backoff(),
        }
    }
}

impl PollConfig {
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(sunspec_common::load_config(path)?)
    }

    /// Overlay environment variables.
    ///
    /// Malformed values fall back to the documented default and are returned
    /// so they can be logged once tracing is initialized.
    pub fn apply_env<E: EnvSource + ?Sized>(&mut self, env: &E) -> Vec<EnvFallback> {
        let mut overlay = EnvOverlay::new(env);

        if let Some(host) = overlay.string("TARGET_IP") {
            self.device.host = host;
        }
        if let Some(port) = overlay.parsed("TARGET_PORT", default_port()) {
            self.device.port = port;
        }
        if let Some(unit_id) = overlay.parsed("UNIT_ID", default_unit_id()) {
            self.device.unit_id = unit_id;
        }
        if let Some(port) = overlay.parsed("LISTEN_PORT", default_listen_port()) {
            self.http.listen_port = port;
        }
        // Zero is not a usable interval, so it is treated as malformed.
        if let Some(interval) = overlay.parsed("SCRAPE_INTERVAL", NonZeroU64::MIN) {
            self.poll.scrape_interval_secs = interval.get();
        }
        if let Some(level) = overlay.string("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = overlay.parsed("LOG_FORMAT", LogFormat::default()) {
            self.logging.format = format;
        }

        overlay.finish()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.host.is_empty() {
            return Err(ConfigError::Validation(
                "device host cannot be empty".to_string(),
            ));
        }

        if !(1..=247).contains(&self.device.unit_id) {
            return Err(ConfigError::Validation(format!(
                "unit_id must be 1-247, got {}",
                self.device.unit_id
            )));
        }

        if self.poll.scrape_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "scrape_interval_secs must be at least 1".to_string(),
            ));
        }

        if !self.http.metrics_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "metrics_path must start with '/', got '{}'",
                self.http.metrics_path
            )));
        }

        Ok(())
    }
}
