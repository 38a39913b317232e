//! Configuration loading
//!
//! Layered config: optional TOML file, overridden by `SUBNET_ALERTER_*`
//! environment variables (e.g. `SUBNET_ALERTER_ENGINE__POLL_INTERVAL_SECS`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Telegram binding; commands and notifications are disabled when absent
    pub telegram: Option<TelegramConfig>,
}

/// Price source endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the subnet price API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// HTTP client timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Evaluation loop tuning
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Seconds between price-check ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Per-subnet price fetch budget within a tick
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Per-alert notification delivery budget
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,
}

/// Durable state file locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_alerts_path")]
    pub alerts_path: String,
    #[serde(default = "default_history_path")]
    pub history_path: String,
}

/// Telegram bot credentials
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat that is allowed to issue commands
    pub chat_id: i64,
}

fn default_base_url() -> String {
    "https://api.taostats.io/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    60
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_alerts_path() -> String {
    "price_alerts.json".to_string()
}

fn default_history_path() -> String {
    "alert_history.json".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            notify_timeout_secs: default_notify_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            alerts_path: default_alerts_path(),
            history_path: default_history_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file (optional) plus env overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SUBNET_ALERTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

impl StorageConfig {
    /// Expand `~` and env vars in the configured paths
    pub fn alerts_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.alerts_path).map_or_else(
            |_| self.alerts_path.clone(),
            |expanded| expanded.into_owned(),
        ))
    }

    pub fn history_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::full(&self.history_path).map_or_else(
            |_| self.history_path.clone(),
            |expanded| expanded.into_owned(),
        ))
    }
}
