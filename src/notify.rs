//! Notification delivery boundary
//!
//! The engine hands a formatted message to a `Notifier` and only counts a
//! trigger as fired once delivery succeeded. Delivery failures leave the
//! alert active for retry on a later tick.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::alerts::{AlertRecord, Direction};
use crate::error::Result;

/// Delivers a message to one user. Implementations must return an error on
/// anything short of confirmed delivery; the engine never retries within a
/// tick and never re-sends a delivered trigger.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner_id: u64, message: &str) -> Result<()>;
}

/// Message for a trigger fired by the evaluation loop
pub fn trigger_message(record: &AlertRecord, current_price: Decimal) -> String {
    let verb = match record.direction {
        Direction::Increase => "increased",
        Direction::Decrease => "decreased",
        Direction::Matched => "matched",
    };
    format!(
        "🚨 Price Alert for Subnet {} 🚨\n\
         Target Price: {:.4} τ\n\
         Current Price: {:.4} τ\n\
         Price has {} from {:.4} τ",
        record.netuid, record.target_price, current_price, verb, record.initial_price
    )
}

/// Message for a registration whose target already equals the current price
pub fn immediate_match_message(netuid: u16, price: Decimal) -> String {
    format!(
        "🚨 Price Alert for Subnet {} 🚨\n\
         Target Price: {:.4} τ\n\
         Current Price: {:.4} τ\n\
         Price matched target price immediately!",
        netuid, price, price
    )
}
