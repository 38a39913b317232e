//! Active alert registrations
//!
//! Keyed subnet -> owner -> list of alerts. Subnets and owners with no
//! remaining alerts are pruned eagerly so `active_subnets` only ever names
//! subnets the evaluation loop actually has to poll.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Direction;

/// One registered price watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRecord {
    /// Process-local sequence id; not persisted
    pub id: u64,
    pub netuid: u16,
    pub owner_id: u64,
    /// Price observed at registration time, immutable
    pub initial_price: Decimal,
    pub target_price: Decimal,
    pub direction: Direction,
}

impl AlertRecord {
    /// Whether `current` satisfies this alert's trigger condition
    pub fn is_triggered_by(&self, current: Decimal) -> bool {
        self.direction.is_triggered_by(current, self.target_price)
    }
}

/// In-memory set of active alerts.
///
/// The lock is only ever held for map reads/mutations, never across an
/// `.await`; price fetches and notification delivery happen outside it.
#[derive(Default)]
pub struct AlertStore {
    inner: RwLock<HashMap<u16, HashMap<u64, Vec<AlertRecord>>>>,
    next_id: AtomicU64,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new alert. Direction is derived here, once.
    ///
    /// Callers must handle `target == current` via the immediate-match path
    /// before calling this; the store accepts such a record but it would
    /// only fire on an exact re-match.
    pub fn register(
        &self,
        netuid: u16,
        owner_id: u64,
        target_price: Decimal,
        current_price: Decimal,
    ) -> AlertRecord {
        let record = AlertRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            netuid,
            owner_id,
            initial_price: current_price,
            target_price,
            direction: Direction::derive(target_price, current_price),
        };

        let mut inner = self.inner.write();
        inner
            .entry(netuid)
            .or_default()
            .entry(owner_id)
            .or_default()
            .push(record.clone());
        record
    }

    /// All active alerts owned by `owner_id`, grouped by subnet
    pub fn list(&self, owner_id: u64) -> Vec<(u16, Vec<AlertRecord>)> {
        let inner = self.inner.read();
        let mut result: Vec<(u16, Vec<AlertRecord>)> = inner
            .iter()
            .filter_map(|(netuid, owners)| {
                owners
                    .get(&owner_id)
                    .filter(|records| !records.is_empty())
                    .map(|records| (*netuid, records.clone()))
            })
            .collect();
        result.sort_by_key(|(netuid, _)| *netuid);
        result
    }

    /// Remove all of an owner's alerts on one subnet. Returns whether
    /// anything was removed; removing nothing is not an error.
    pub fn cancel(&self, netuid: u16, owner_id: u64) -> bool {
        let mut inner = self.inner.write();
        let Some(owners) = inner.get_mut(&netuid) else {
            return false;
        };
        let removed = owners.remove(&owner_id).is_some_and(|r| !r.is_empty());
        if owners.is_empty() {
            inner.remove(&netuid);
        }
        removed
    }

    /// Subnets the evaluation loop must poll this tick
    pub fn active_subnets(&self) -> Vec<u16> {
        let mut subnets: Vec<u16> = self.inner.read().keys().copied().collect();
        subnets.sort_unstable();
        subnets
    }

    /// Alerts on `netuid` whose trigger condition `current` satisfies
    pub fn triggered_by(&self, netuid: u16, current: Decimal) -> Vec<AlertRecord> {
        let inner = self.inner.read();
        inner
            .get(&netuid)
            .map(|owners| {
                owners
                    .values()
                    .flatten()
                    .filter(|record| record.is_triggered_by(current))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove one specific record after its notification was delivered.
    ///
    /// Returns false if the record is gone already (cancelled between the
    /// trigger snapshot and delivery), in which case the caller must not
    /// write history for it.
    pub fn complete(&self, record: &AlertRecord) -> bool {
        let mut inner = self.inner.write();
        let Some(owners) = inner.get_mut(&record.netuid) else {
            return false;
        };
        let Some(records) = owners.get_mut(&record.owner_id) else {
            return false;
        };
        let before = records.len();
        records.retain(|r| r.id != record.id);
        let removed = records.len() < before;

        if records.is_empty() {
            owners.remove(&record.owner_id);
        }
        if owners.is_empty() {
            inner.remove(&record.netuid);
        }
        removed
    }

    /// Point-in-time copy of every active alert, for persistence
    pub fn snapshot(&self) -> Vec<AlertRecord> {
        self.inner
            .read()
            .values()
            .flat_map(|owners| owners.values().flatten().cloned())
            .collect()
    }

    /// Replace the store contents with loaded records, reassigning ids
    pub fn restore(&self, records: Vec<(u16, u64, Decimal, Decimal)>) {
        let mut inner = self.inner.write();
        inner.clear();
        for (netuid, owner_id, target_price, initial_price) in records {
            let record = AlertRecord {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                netuid,
                owner_id,
                initial_price,
                target_price,
                direction: Direction::derive(target_price, initial_price),
            };
            inner
                .entry(netuid)
                .or_default()
                .entry(owner_id)
                .or_default()
                .push(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn register_derives_direction() {
        let store = AlertStore::new();
        let up = store.register(7, 100, dec!(1.5), dec!(1.0));
        assert_eq!(up.direction, Direction::Increase);
        assert_eq!(up.initial_price, dec!(1.0));

        let down = store.register(7, 100, dec!(0.8), dec!(1.0));
        assert_eq!(down.direction, Direction::Decrease);
    }

    #[test]
    fn multiple_alerts_per_owner_and_subnet() {
        let store = AlertStore::new();
        store.register(7, 100, dec!(1.5), dec!(1.0));
        store.register(7, 100, dec!(2.0), dec!(1.0));
        store.register(9, 100, dec!(0.5), dec!(1.0));

        let listed = store.list(100);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, 7);
        assert_eq!(listed[0].1.len(), 2);
        assert_eq!(listed[1].0, 9);
    }

    #[test]
    fn ids_are_unique() {
        let store = AlertStore::new();
        let a = store.register(7, 100, dec!(1.5), dec!(1.0));
        let b = store.register(7, 100, dec!(1.5), dec!(1.0));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn cancel_removes_all_owner_alerts_on_subnet() {
        let store = AlertStore::new();
        store.register(7, 100, dec!(1.5), dec!(1.0));
        store.register(7, 100, dec!(2.0), dec!(1.0));
        store.register(7, 200, dec!(2.0), dec!(1.0));

        assert!(store.cancel(7, 100));
        assert!(store.list(100).is_empty());
        // other owner untouched
        assert_eq!(store.list(200).len(), 1);
        // second cancel is a no-op, not an error
        assert!(!store.cancel(7, 100));
        assert!(!store.cancel(42, 100));
    }

    #[test]
    fn active_subnets_prunes_empty() {
        let store = AlertStore::new();
        store.register(7, 100, dec!(1.5), dec!(1.0));
        store.register(9, 200, dec!(0.5), dec!(1.0));
        assert_eq!(store.active_subnets(), vec![7, 9]);

        store.cancel(9, 200);
        assert_eq!(store.active_subnets(), vec![7]);
    }

    #[test]
    fn triggered_by_respects_direction() {
        let store = AlertStore::new();
        store.register(7, 100, dec!(1.5), dec!(1.0)); // increase
        store.register(7, 200, dec!(0.5), dec!(1.0)); // decrease

        assert!(store.triggered_by(7, dec!(1.2)).is_empty());

        let up = store.triggered_by(7, dec!(1.6));
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].owner_id, 100);

        let down = store.triggered_by(7, dec!(0.4));
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].owner_id, 200);
    }

    #[test]
    fn complete_removes_exactly_one_record() {
        let store = AlertStore::new();
        let first = store.register(7, 100, dec!(1.5), dec!(1.0));
        store.register(7, 100, dec!(1.6), dec!(1.0));

        assert!(store.complete(&first));
        assert_eq!(store.list(100)[0].1.len(), 1);
        // already gone
        assert!(!store.complete(&first));
    }

    #[test]
    fn complete_prunes_subnet_when_last_record_leaves() {
        let store = AlertStore::new();
        let only = store.register(7, 100, dec!(1.5), dec!(1.0));
        assert!(store.complete(&only));
        assert!(store.active_subnets().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn restore_rebuilds_directions() {
        let store = AlertStore::new();
        store.restore(vec![(7, 100, dec!(1.5), dec!(1.0)), (7, 100, dec!(0.5), dec!(1.0))]);

        let listed = store.list(100);
        assert_eq!(listed[0].1.len(), 2);
        let directions: Vec<Direction> =
            listed[0].1.iter().map(|r| r.direction).collect();
        assert!(directions.contains(&Direction::Increase));
        assert!(directions.contains(&Direction::Decrease));
    }
}
