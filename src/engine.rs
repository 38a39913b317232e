//! The alert engine
//!
//! Owns the store, the history, and the evaluation loop, and exposes the
//! command surface (`set_alert`, `list_alerts`, `remove_alert`, `history`,
//! `price`). Command handlers and the loop run as independent tasks; they
//! only meet inside the store's synchronized operations.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alerts::{history_entry_for, AlertHistory, AlertRecord, AlertStore, Direction, HistoryEntry};
use crate::config::EngineConfig;
use crate::error::{BotError, Result};
use crate::notify::{immediate_match_message, trigger_message, Notifier};
use crate::source::{PriceSource, SubnetPrice};
use crate::storage::Persister;

/// What `set_alert` did
#[derive(Debug, Clone)]
pub enum SetAlertOutcome {
    /// A watch was registered and will be evaluated every tick
    Registered {
        record: AlertRecord,
        current_price: Decimal,
        subnet_name: String,
    },
    /// Target equalled the current price; the alert fired inline and was
    /// never inserted into the store
    ImmediateMatch { netuid: u16, price: Decimal },
}

pub struct AlertEngine {
    store: AlertStore,
    history: AlertHistory,
    source: Arc<dyn PriceSource>,
    notifier: Arc<dyn Notifier>,
    persister: Persister,
    config: EngineConfig,
}

impl AlertEngine {
    pub fn new(
        source: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
        persister: Persister,
        config: EngineConfig,
    ) -> Self {
        Self {
            store: AlertStore::new(),
            history: AlertHistory::new(),
            source,
            notifier,
            persister,
            config,
        }
    }

    /// Restore persisted alerts and history. Call once before serving.
    pub async fn load_state(&self) {
        let (alerts, history) = self.persister.load().await;
        let alert_count = alerts.len();
        self.store.restore(alerts);
        self.history.restore(history);
        info!(alerts = alert_count, "loaded persisted state");
    }

    /// Register a price watch for `owner_id` on `netuid`.
    ///
    /// Unknown subnets are rejected synchronously with no state change. A
    /// target equal to the current price takes the immediate-match path:
    /// notify now, record history, insert nothing.
    pub async fn set_alert(
        &self,
        owner_id: u64,
        netuid: u16,
        target_price: Decimal,
    ) -> Result<SetAlertOutcome> {
        if target_price <= Decimal::ZERO {
            return Err(BotError::InvalidInput(format!(
                "target price must be positive, got {target_price}"
            )));
        }

        let quote = self.source.get_price(netuid).await?;

        if target_price == quote.price {
            return self.fire_immediate(owner_id, &quote).await;
        }

        let record = self.store.register(netuid, owner_id, target_price, quote.price);
        self.persist().await;
        info!(
            netuid,
            owner_id,
            target = %record.target_price,
            direction = %record.direction,
            "alert registered"
        );

        Ok(SetAlertOutcome::Registered {
            record,
            current_price: quote.price,
            subnet_name: quote.name,
        })
    }

    /// The §4.2 trigger path run once, inline, at registration time
    async fn fire_immediate(&self, owner_id: u64, quote: &SubnetPrice) -> Result<SetAlertOutcome> {
        let message = immediate_match_message(quote.netuid, quote.price);
        // a timed-out send is still a failed delivery from the caller's view
        self.deliver(owner_id, &message).await.map_err(|e| match e {
            BotError::Timeout(_) => BotError::DeliveryFailed("delivery timed out".to_string()),
            other => other,
        })?;

        self.history.append(HistoryEntry {
            alert_id: 0,
            netuid: quote.netuid,
            owner_id,
            target_price: quote.price,
            initial_price: quote.price,
            triggered_price: quote.price,
            direction: Direction::Matched,
            timestamp: Utc::now(),
        });
        self.persist().await;
        info!(netuid = quote.netuid, owner_id, "alert matched immediately");

        Ok(SetAlertOutcome::ImmediateMatch {
            netuid: quote.netuid,
            price: quote.price,
        })
    }

    /// All active alerts owned by `owner_id`, grouped by subnet
    pub fn list_alerts(&self, owner_id: u64) -> Vec<(u16, Vec<AlertRecord>)> {
        self.store.list(owner_id)
    }

    /// Remove all of an owner's alerts on one subnet
    pub async fn remove_alert(&self, owner_id: u64, netuid: u16) -> bool {
        let removed = self.store.cancel(netuid, owner_id);
        if removed {
            self.persist().await;
            info!(netuid, owner_id, "alerts removed");
        }
        removed
    }

    /// Trigger history, for one subnet or all of them
    pub fn history(&self, netuid: Option<u16>) -> HashMap<u16, Vec<HistoryEntry>> {
        match netuid {
            Some(netuid) => {
                let entries = self.history.for_subnet(netuid);
                if entries.is_empty() {
                    HashMap::new()
                } else {
                    HashMap::from([(netuid, entries)])
                }
            }
            None => self.history.all(),
        }
    }

    /// Passthrough price query; never touches the store
    pub async fn price(&self, netuid: u16) -> Result<SubnetPrice> {
        self.source.get_price(netuid).await
    }

    /// Run the evaluation loop until the task is dropped
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.poll_interval_secs,
            "evaluation loop started"
        );

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One polling cycle over every subnet with at least one active alert
    pub async fn tick(&self) {
        let subnets = self.store.active_subnets();
        if subnets.is_empty() {
            return;
        }
        debug!(subnets = subnets.len(), "price check tick");

        for netuid in subnets {
            let quote = match timeout(
                self.config.fetch_timeout(),
                self.source.get_price(netuid),
            )
            .await
            {
                Ok(Ok(quote)) => quote,
                Ok(Err(e)) => {
                    // NotFound and Unavailable alike: transient, keep alerts
                    warn!(netuid, "skipping subnet this tick: {e}");
                    continue;
                }
                Err(_) => {
                    warn!(netuid, "price fetch timed out, skipping subnet this tick");
                    continue;
                }
            };

            self.evaluate_subnet(&quote).await;
        }
    }

    /// Evaluate and fire every satisfied alert on one subnet, then persist
    /// once if anything changed.
    async fn evaluate_subnet(&self, quote: &SubnetPrice) {
        let due = self.store.triggered_by(quote.netuid, quote.price);
        if due.is_empty() {
            return;
        }

        let mut changed = false;
        for record in due {
            let message = trigger_message(&record, quote.price);
            match self.deliver(record.owner_id, &message).await {
                Ok(()) => {
                    // A concurrent cancel may have beaten us; only write
                    // history if the record was still active.
                    if self.store.complete(&record) {
                        self.history
                            .append(history_entry_for(&record, quote.price, Utc::now()));
                        changed = true;
                        info!(
                            netuid = record.netuid,
                            owner_id = record.owner_id,
                            target = %record.target_price,
                            current = %quote.price,
                            "alert triggered"
                        );
                    }
                }
                Err(e) => {
                    // Alert stays active; retried next tick
                    warn!(
                        netuid = record.netuid,
                        owner_id = record.owner_id,
                        "delivery failed, keeping alert active: {e}"
                    );
                }
            }
        }

        if changed {
            self.persist().await;
        }
    }

    /// Notify with the configured delivery budget
    async fn deliver(&self, owner_id: u64, message: &str) -> Result<()> {
        match timeout(
            self.config.notify_timeout(),
            self.notifier.notify(owner_id, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BotError::Timeout("notification delivery")),
        }
    }

    /// Persist the current state. The snapshot is taken by the persister
    /// under its writer lock, so a save racing another (command task vs.
    /// loop task) can never write an older state over a newer one. Failures
    /// are logged, not fatal: in-memory state stays authoritative and the
    /// next mutation retries the write.
    async fn persist(&self) {
        let result = self
            .persister
            .save(|| (self.store.snapshot(), self.history.all()))
            .await;
        if let Err(e) = result {
            error!("persistence failed, in-memory state remains authoritative: {e}");
        }
    }
}
