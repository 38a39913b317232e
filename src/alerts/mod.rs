//! Alert registrations and trigger history
//!
//! The store owns the active alert set, the history owns the append-only
//! trigger log. Both are encapsulated behind operations; nothing else in the
//! crate touches the underlying maps.

mod history;
mod store;

pub use history::{AlertHistory, HistoryEntry};
pub use store::{AlertRecord, AlertStore};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which way a registered alert watches the price move.
///
/// Derived once at registration from target vs. current price and never
/// recomputed. `Matched` only ever reaches the history via the
/// immediate-match path or legacy data without an initial price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "increased")]
    Increase,
    #[serde(alias = "decreased")]
    Decrease,
    Matched,
}

impl Direction {
    /// Derive the watch direction at registration time
    pub fn derive(target_price: Decimal, initial_price: Decimal) -> Self {
        if target_price > initial_price {
            Direction::Increase
        } else if target_price < initial_price {
            Direction::Decrease
        } else {
            Direction::Matched
        }
    }

    /// Whether an observed price satisfies the trigger condition.
    /// Exact equality always matches, whichever way the watch points.
    pub fn is_triggered_by(&self, current: Decimal, target: Decimal) -> bool {
        match self {
            Direction::Increase => current >= target,
            Direction::Decrease => current <= target,
            Direction::Matched => current == target,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Increase => write!(f, "increase"),
            Direction::Decrease => write!(f, "decrease"),
            Direction::Matched => write!(f, "matched"),
        }
    }
}

/// Build the history entry for a trigger that was just delivered
pub(crate) fn history_entry_for(
    record: &AlertRecord,
    triggered_price: Decimal,
    timestamp: DateTime<Utc>,
) -> HistoryEntry {
    HistoryEntry {
        alert_id: record.id,
        netuid: record.netuid,
        owner_id: record.owner_id,
        target_price: record.target_price,
        initial_price: record.initial_price,
        triggered_price,
        direction: record.direction,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn direction_derivation() {
        assert_eq!(Direction::derive(dec!(1.5), dec!(1.0)), Direction::Increase);
        assert_eq!(Direction::derive(dec!(0.5), dec!(1.0)), Direction::Decrease);
        assert_eq!(Direction::derive(dec!(1.0), dec!(1.0)), Direction::Matched);
    }

    #[test]
    fn increase_triggers_at_or_above_target() {
        let d = Direction::Increase;
        assert!(!d.is_triggered_by(dec!(1.2), dec!(1.5)));
        assert!(d.is_triggered_by(dec!(1.5), dec!(1.5)));
        assert!(d.is_triggered_by(dec!(1.6), dec!(1.5)));
    }

    #[test]
    fn decrease_triggers_at_or_below_target() {
        let d = Direction::Decrease;
        assert!(!d.is_triggered_by(dec!(0.9), dec!(0.5)));
        assert!(d.is_triggered_by(dec!(0.5), dec!(0.5)));
        assert!(d.is_triggered_by(dec!(0.4), dec!(0.5)));
    }

    #[test]
    fn matched_triggers_only_on_equality() {
        let d = Direction::Matched;
        assert!(!d.is_triggered_by(dec!(0.9), dec!(1.0)));
        assert!(!d.is_triggered_by(dec!(1.1), dec!(1.0)));
        assert!(d.is_triggered_by(dec!(1.0), dec!(1.0)));
    }

    #[test]
    fn legacy_direction_aliases_parse() {
        let d: Direction = serde_json::from_str("\"increased\"").unwrap();
        assert_eq!(d, Direction::Increase);
        let d: Direction = serde_json::from_str("\"decreased\"").unwrap();
        assert_eq!(d, Direction::Decrease);
        // current spelling serializes without the legacy suffix
        assert_eq!(serde_json::to_string(&Direction::Increase).unwrap(), "\"increase\"");
    }
}
