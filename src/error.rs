//! Error types for the alert engine

use thiserror::Error;

/// Errors produced by the alert engine and its adapters
#[derive(Error, Debug)]
pub enum BotError {
    /// The price source does not know this subnet
    #[error("subnet {netuid} does not exist")]
    SubnetNotFound { netuid: u16 },

    /// The price source knows the subnet but could not produce a price.
    /// Transient: callers skip the subnet and retry on a later tick.
    #[error("price for subnet {netuid} unavailable: {reason}")]
    SourceUnavailable { netuid: u16, reason: String },

    /// Notification could not be delivered. The alert stays active.
    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),

    /// Writing or reading persisted state failed. In-memory state stays
    /// authoritative until a write succeeds.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Rejected synchronously at the command boundary, no state change.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, BotError>;

impl From<std::io::Error> for BotError {
    fn from(e: std::io::Error) -> Self {
        BotError::Persistence(e.to_string())
    }
}
