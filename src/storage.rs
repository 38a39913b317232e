//! Durable state for alerts and history
//!
//! Two JSON files, matching the layout the original deployment left on disk:
//!
//! - alerts: `{ "<netuid>": { "<owner_id>": [ { target_price, initial_price } ] } }`
//! - history: `{ "<netuid>": [ { user_id, target_price, initial_price,
//!   triggered_price, direction, timestamp } ] }`
//!
//! JSON maps are string-keyed, so integer keys are stringified on write and
//! parsed back on load. Loading also migrates two legacy shapes: an owner
//! value that is a bare scalar target price (pre-list format, no initial
//! price) and history entries missing `initial_price`/`direction`. Both
//! default the initial price to the target, which degrades direction to
//! `matched`.
//!
//! Writes go to `<path>.tmp` and are moved into place with an atomic rename,
//! so a crash mid-write leaves the previous file intact. A single writer
//! mutex serializes saves, and the state snapshot is taken only once that
//! lock is held: saves hit the disk in snapshot order, a queued save picks up
//! any mutation that landed while it waited, and the file always ends up
//! holding the newest state.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::alerts::{AlertRecord, Direction, HistoryEntry};
use crate::config::StorageConfig;
use crate::error::Result;

/// Alert rows as loaded from disk: (netuid, owner, target, initial)
pub type LoadedAlerts = Vec<(u16, u64, Decimal, Decimal)>;

#[derive(Debug, Serialize)]
struct WireAlert {
    target_price: Decimal,
    initial_price: Decimal,
}

#[derive(Debug, Deserialize)]
struct WireAlertIn {
    target_price: Decimal,
    #[serde(default)]
    initial_price: Option<Decimal>,
}

/// Owner value in the alerts file; the scalar arm is the legacy
/// single-alert-per-owner format.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireOwnerAlerts {
    Many(Vec<WireAlertIn>),
    LegacyScalar(Decimal),
}

#[derive(Debug, Serialize)]
struct WireHistoryEntry {
    user_id: u64,
    target_price: Decimal,
    initial_price: Decimal,
    triggered_price: Decimal,
    direction: Direction,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct WireHistoryEntryIn {
    user_id: u64,
    target_price: Decimal,
    #[serde(default)]
    initial_price: Option<Decimal>,
    triggered_price: Decimal,
    #[serde(default)]
    direction: Option<Direction>,
    timestamp: String,
}

/// Serialized writer for the two state files
pub struct Persister {
    alerts_path: PathBuf,
    history_path: PathBuf,
    write_lock: Mutex<()>,
}

impl Persister {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            alerts_path: config.alerts_file(),
            history_path: config.history_file(),
            write_lock: Mutex::new(()),
        }
    }

    /// Write both files. `snapshot` runs with the writer lock held, so two
    /// racing saves cannot write an older state over a newer one.
    pub async fn save<F>(&self, snapshot: F) -> Result<()>
    where
        F: FnOnce() -> (Vec<AlertRecord>, HashMap<u16, Vec<HistoryEntry>>) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let (alerts, history) = snapshot();
        let alerts_json = serde_json::to_vec(&encode_alerts(&alerts))?;
        let history_json = serde_json::to_vec(&encode_history(&history))?;
        write_atomic(&self.alerts_path, &alerts_json).await?;
        write_atomic(&self.history_path, &history_json).await?;
        debug!(
            alerts = alerts.len(),
            path = %self.alerts_path.display(),
            "persisted state"
        );
        Ok(())
    }

    /// Load both files. A missing file means a fresh start; a malformed one
    /// is logged loudly and treated as empty rather than crashing.
    pub async fn load(&self) -> (LoadedAlerts, HashMap<u16, Vec<HistoryEntry>>) {
        let alerts = match read_json::<BTreeMap<String, BTreeMap<String, WireOwnerAlerts>>>(
            &self.alerts_path,
        )
        .await
        {
            Ok(Some(wire)) => decode_alerts(wire),
            Ok(None) => Vec::new(),
            Err(e) => {
                error!(path = %self.alerts_path.display(), "unreadable alerts file, starting empty: {e}");
                Vec::new()
            }
        };

        let history = match read_json::<BTreeMap<String, Vec<WireHistoryEntryIn>>>(
            &self.history_path,
        )
        .await
        {
            Ok(Some(wire)) => decode_history(wire),
            Ok(None) => HashMap::new(),
            Err(e) => {
                error!(path = %self.history_path.display(), "unreadable history file, starting empty: {e}");
                HashMap::new()
            }
        };

        (alerts, history)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn encode_alerts(alerts: &[AlertRecord]) -> BTreeMap<String, BTreeMap<String, Vec<WireAlert>>> {
    let mut out: BTreeMap<String, BTreeMap<String, Vec<WireAlert>>> = BTreeMap::new();
    for record in alerts {
        out.entry(record.netuid.to_string())
            .or_default()
            .entry(record.owner_id.to_string())
            .or_default()
            .push(WireAlert {
                target_price: record.target_price,
                initial_price: record.initial_price,
            });
    }
    out
}

fn decode_alerts(wire: BTreeMap<String, BTreeMap<String, WireOwnerAlerts>>) -> LoadedAlerts {
    let mut out = Vec::new();
    for (netuid_key, owners) in wire {
        let Ok(netuid) = netuid_key.parse::<u16>() else {
            warn!(key = %netuid_key, "skipping alerts entry with non-integer subnet key");
            continue;
        };
        for (owner_key, owner_alerts) in owners {
            let Ok(owner_id) = owner_key.parse::<u64>() else {
                warn!(key = %owner_key, "skipping alerts entry with non-integer owner key");
                continue;
            };
            match owner_alerts {
                WireOwnerAlerts::Many(list) => {
                    for alert in list {
                        let initial = alert.initial_price.unwrap_or(alert.target_price);
                        out.push((netuid, owner_id, alert.target_price, initial));
                    }
                }
                WireOwnerAlerts::LegacyScalar(target) => {
                    out.push((netuid, owner_id, target, target));
                }
            }
        }
    }
    out
}

fn encode_history(
    history: &HashMap<u16, Vec<HistoryEntry>>,
) -> BTreeMap<String, Vec<WireHistoryEntry>> {
    history
        .iter()
        .map(|(netuid, entries)| {
            let wire = entries
                .iter()
                .map(|e| WireHistoryEntry {
                    user_id: e.owner_id,
                    target_price: e.target_price,
                    initial_price: e.initial_price,
                    triggered_price: e.triggered_price,
                    direction: e.direction,
                    timestamp: e.timestamp.to_rfc3339(),
                })
                .collect();
            (netuid.to_string(), wire)
        })
        .collect()
}

fn decode_history(
    wire: BTreeMap<String, Vec<WireHistoryEntryIn>>,
) -> HashMap<u16, Vec<HistoryEntry>> {
    let mut out: HashMap<u16, Vec<HistoryEntry>> = HashMap::new();
    for (netuid_key, entries) in wire {
        let Ok(netuid) = netuid_key.parse::<u16>() else {
            warn!(key = %netuid_key, "skipping history entry with non-integer subnet key");
            continue;
        };
        let decoded = entries
            .into_iter()
            .map(|e| {
                let initial = e.initial_price.unwrap_or(e.target_price);
                HistoryEntry {
                    alert_id: 0,
                    netuid,
                    owner_id: e.user_id,
                    target_price: e.target_price,
                    initial_price: initial,
                    triggered_price: e.triggered_price,
                    direction: e
                        .direction
                        .unwrap_or_else(|| Direction::derive(e.target_price, initial)),
                    timestamp: parse_timestamp(&e.timestamp),
                }
            })
            .collect();
        out.insert(netuid, decoded);
    }
    out
}

/// RFC 3339 first, then the naive `datetime.isoformat()` form the original
/// deployment wrote (no offset, assumed UTC).
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return ts.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    warn!(%raw, "unparseable history timestamp, substituting epoch");
    DateTime::<Utc>::UNIX_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn persister_in(dir: &TempDir) -> Persister {
        Persister::new(&StorageConfig {
            alerts_path: dir.path().join("alerts.json").display().to_string(),
            history_path: dir.path().join("history.json").display().to_string(),
        })
    }

    fn record(netuid: u16, owner: u64, target: Decimal, initial: Decimal) -> AlertRecord {
        AlertRecord {
            id: 0,
            netuid,
            owner_id: owner,
            initial_price: initial,
            target_price: target,
            direction: Direction::derive(target, initial),
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_alerts_and_history() {
        let dir = TempDir::new().unwrap();
        let persister = persister_in(&dir);

        let alerts = vec![
            record(7, 100, dec!(1.5), dec!(1.0)),
            record(7, 100, dec!(0.5), dec!(1.0)),
            record(9, 200, dec!(2.0), dec!(3.0)),
        ];
        let mut history = HashMap::new();
        history.insert(
            7,
            vec![HistoryEntry {
                alert_id: 1,
                netuid: 7,
                owner_id: 100,
                target_price: dec!(1.5),
                initial_price: dec!(1.0),
                triggered_price: dec!(1.6),
                direction: Direction::Increase,
                timestamp: Utc::now(),
            }],
        );

        persister.save(|| (alerts, history)).await.unwrap();
        let (loaded_alerts, loaded_history) = persister.load().await;

        let mut rows = loaded_alerts;
        rows.sort();
        assert_eq!(
            rows,
            vec![
                (7, 100, dec!(0.5), dec!(1.0)),
                (7, 100, dec!(1.5), dec!(1.0)),
                (9, 200, dec!(2.0), dec!(3.0)),
            ]
        );

        let entries = &loaded_history[&7];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].owner_id, 100);
        assert_eq!(entries[0].triggered_price, dec!(1.6));
        assert_eq!(entries[0].direction, Direction::Increase);
    }

    #[tokio::test]
    async fn missing_files_load_empty() {
        let dir = TempDir::new().unwrap();
        let persister = persister_in(&dir);
        let (alerts, history) = persister.load().await;
        assert!(alerts.is_empty());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn legacy_scalar_alerts_migrate_to_degenerate_direction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, r#"{"7": {"100": 1.5, "200": [{"target_price": 2.0}]}}"#).unwrap();

        let persister = Persister::new(&StorageConfig {
            alerts_path: path.display().to_string(),
            history_path: dir.path().join("history.json").display().to_string(),
        });
        let (mut alerts, _) = persister.load().await;
        alerts.sort();

        // absent initial price collapses to target, direction becomes matched
        assert_eq!(alerts, vec![(7, 100, dec!(1.5), dec!(1.5)), (7, 200, dec!(2.0), dec!(2.0))]);
        assert_eq!(Direction::derive(alerts[0].2, alerts[0].3), Direction::Matched);
    }

    #[tokio::test]
    async fn legacy_history_entries_migrate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(
            &path,
            r#"{"7": [
                {"user_id": 100, "target_price": 1.5, "triggered_price": 1.5,
                 "timestamp": "2024-03-01T10:20:30.123456"},
                {"user_id": 200, "target_price": 1.5, "initial_price": 1.0,
                 "triggered_price": 1.6, "direction": "increased",
                 "timestamp": "2024-03-01T10:21:00+00:00"}
            ]}"#,
        )
        .unwrap();

        let persister = Persister::new(&StorageConfig {
            alerts_path: dir.path().join("alerts.json").display().to_string(),
            history_path: path.display().to_string(),
        });
        let (_, history) = persister.load().await;
        let entries = &history[&7];

        assert_eq!(entries[0].initial_price, dec!(1.5));
        assert_eq!(entries[0].direction, Direction::Matched);
        assert_eq!(entries[0].timestamp.timestamp(), 1709288430);

        assert_eq!(entries[1].direction, Direction::Increase);
        assert_eq!(entries[1].initial_price, dec!(1.0));
    }

    #[tokio::test]
    async fn malformed_file_falls_back_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, "{not json").unwrap();

        let persister = Persister::new(&StorageConfig {
            alerts_path: path.display().to_string(),
            history_path: dir.path().join("history.json").display().to_string(),
        });
        let (alerts, _) = persister.load().await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let persister = persister_in(&dir);
        persister
            .save(|| (vec![record(7, 100, dec!(1.5), dec!(1.0))], HashMap::new()))
            .await
            .unwrap();

        assert!(dir.path().join("alerts.json").exists());
        assert!(!dir.path().join("alerts.json.tmp").exists());
        assert!(!dir.path().join("history.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_overwrites_previous_state() {
        let dir = TempDir::new().unwrap();
        let persister = persister_in(&dir);

        persister
            .save(|| (vec![record(7, 100, dec!(1.5), dec!(1.0))], HashMap::new()))
            .await
            .unwrap();
        persister
            .save(|| (vec![record(9, 200, dec!(2.5), dec!(2.0))], HashMap::new()))
            .await
            .unwrap();

        let (alerts, _) = persister.load().await;
        assert_eq!(alerts, vec![(9, 200, dec!(2.5), dec!(2.0))]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queued_save_persists_state_mutated_while_it_waited() {
        let dir = TempDir::new().unwrap();
        let persister = Arc::new(persister_in(&dir));
        let state = Arc::new(Mutex::new(vec![record(7, 100, dec!(1.5), dec!(1.0))]));

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        // first save parks inside its snapshot while holding the writer lock
        let first = {
            let persister = persister.clone();
            let state = state.clone();
            tokio::spawn(async move {
                persister
                    .save(move || {
                        entered_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        (state.lock().clone(), HashMap::new())
                    })
                    .await
                    .unwrap();
            })
        };

        // a trigger removes the alert while the first save is still in flight
        entered_rx.recv().unwrap();
        *state.lock() = vec![record(9, 200, dec!(2.5), dec!(2.0))];

        let second = {
            let persister = persister.clone();
            let state = state.clone();
            tokio::spawn(async move {
                persister
                    .save(move || (state.lock().clone(), HashMap::new()))
                    .await
                    .unwrap();
            })
        };

        release_tx.send(()).unwrap();
        first.await.unwrap();
        second.await.unwrap();

        // snapshots are taken in lock order, so the mutation can never be
        // overwritten by the save that started before it
        let (alerts, _) = persister.load().await;
        assert_eq!(alerts, vec![(9, 200, dec!(2.5), dec!(2.0))]);
    }
}
