//! Append-only record of triggered alerts

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::Direction;

/// One past trigger. Written once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub alert_id: u64,
    pub netuid: u16,
    pub owner_id: u64,
    pub target_price: Decimal,
    pub initial_price: Decimal,
    pub triggered_price: Decimal,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

/// Trigger log, keyed by subnet, chronological within a subnet.
/// Appends and reads may run concurrently from the loop and command tasks.
#[derive(Default)]
pub struct AlertHistory {
    inner: RwLock<HashMap<u16, Vec<HistoryEntry>>>,
}

impl AlertHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: HistoryEntry) {
        self.inner.write().entry(entry.netuid).or_default().push(entry);
    }

    /// Triggers for one subnet, oldest first
    pub fn for_subnet(&self, netuid: u16) -> Vec<HistoryEntry> {
        self.inner.read().get(&netuid).cloned().unwrap_or_default()
    }

    /// All triggers, grouped by subnet
    pub fn all(&self) -> HashMap<u16, Vec<HistoryEntry>> {
        self.inner.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Replace contents with loaded entries (startup only)
    pub fn restore(&self, entries: HashMap<u16, Vec<HistoryEntry>>) {
        *self.inner.write() = entries;
    }
}
