//! Price source adapter
//!
//! Fetches the current price of a subnet from an HTTP API. The engine only
//! sees the `PriceSource` trait so ticks can be driven by a fake in tests.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{BotError, Result};

/// Current quote for one subnet
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetPrice {
    pub netuid: u16,
    pub name: String,
    pub price: Decimal,
}

/// Anything that can answer "what does subnet N cost right now"
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Errors with `SubnetNotFound` for unknown subnets and
    /// `SourceUnavailable` for transient failures; the evaluation loop
    /// treats both the same way (skip this tick, keep the alerts).
    async fn get_price(&self, netuid: u16) -> Result<SubnetPrice>;
}

/// HTTP client for the subnet price API
#[derive(Clone)]
pub struct HttpPriceSource {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SubnetResponse {
    netuid: u16,
    #[serde(default)]
    name: Option<String>,
    price: Option<Decimal>,
}

impl HttpPriceSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn get_price(&self, netuid: u16) -> Result<SubnetPrice> {
        let url = format!("{}/subnets/{}", self.base_url, netuid);
        debug!(netuid, %url, "fetching subnet price");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BotError::SourceUnavailable {
                netuid,
                reason: e.to_string(),
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BotError::SubnetNotFound { netuid });
        }
        if !response.status().is_success() {
            return Err(BotError::SourceUnavailable {
                netuid,
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: SubnetResponse =
            response.json().await.map_err(|e| BotError::SourceUnavailable {
                netuid,
                reason: e.to_string(),
            })?;

        // A known subnet without a price is inactive, not missing
        let price = body.price.ok_or_else(|| BotError::SourceUnavailable {
            netuid,
            reason: "no price reported".to_string(),
        })?;

        Ok(SubnetPrice {
            netuid: body.netuid,
            name: body.name.unwrap_or_else(|| "Unknown".to_string()),
            price,
        })
    }
}
