//! Telegram binding
//!
//! Thin adapter over the engine: long-polls `getUpdates`, parses the five
//! user commands, and formats replies. `TelegramNotifier` is the concrete
//! delivery implementation the engine fires triggers through. No alert
//! invariants live here.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::alerts::AlertRecord;
use crate::engine::{AlertEngine, SetAlertOutcome};
use crate::error::{BotError, Result};
use crate::notify::Notifier;

const API_BASE: &str = "https://api.telegram.org";

/// Sends trigger notifications as direct messages
pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: i64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: String) -> Self {
        Self {
            http: Client::new(),
            bot_token,
        }
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", API_BASE, self.bot_token);
        let request = SendMessageRequest {
            chat_id,
            text: text.to_string(),
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BotError::DeliveryFailed(e.to_string()))?;

        let body: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| BotError::DeliveryFailed(e.to_string()))?;

        if !body.ok {
            return Err(BotError::DeliveryFailed(
                body.description.unwrap_or_else(|| "rejected by API".to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, owner_id: u64, message: &str) -> Result<()> {
        self.send_to(owner_id as i64, message).await
    }
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    result: Vec<TelegramUpdate>,
}

/// Command listener bound to one authorized chat
pub struct TelegramBot {
    http: Client,
    bot_token: String,
    chat_id: i64,
    last_update_id: RwLock<i64>,
    engine: Arc<AlertEngine>,
    notifier: TelegramNotifier,
}

impl TelegramBot {
    pub fn new(bot_token: String, chat_id: i64, engine: Arc<AlertEngine>) -> Self {
        Self {
            http: Client::new(),
            bot_token: bot_token.clone(),
            chat_id,
            last_update_id: RwLock::new(0),
            engine,
            notifier: TelegramNotifier::new(bot_token),
        }
    }

    /// Poll for commands until the task is dropped
    pub async fn start_polling(self: Arc<Self>) {
        info!("Telegram command listener started");

        loop {
            match self.poll_updates().await {
                Ok(updates) => {
                    for update in updates {
                        {
                            let mut last_id = self.last_update_id.write().await;
                            *last_id = update.update_id + 1;
                        }
                        let Some(msg) = update.message else { continue };
                        // Only the configured chat may issue commands
                        if msg.chat.id != self.chat_id {
                            continue;
                        }
                        let owner_id = match msg.from {
                            Some(user) if user.id > 0 => user.id as u64,
                            _ => continue,
                        };
                        if let Some(text) = msg.text {
                            self.handle_message(owner_id, &text).await;
                        }
                    }
                }
                Err(e) => {
                    error!("failed to poll Telegram updates: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }

            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    async fn poll_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let last_id = *self.last_update_id.read().await;
        let url = format!(
            "{}/bot{}/getUpdates?offset={}&timeout=30",
            API_BASE, self.bot_token, last_id
        );

        let response: GetUpdatesResponse = self.http.get(&url).send().await?.json().await?;
        Ok(response.result)
    }

    async fn handle_message(&self, owner_id: u64, text: &str) {
        let text = text.trim();
        let (cmd, args) = match parse_command(text) {
            Some(parsed) => parsed,
            None => return,
        };

        info!(owner_id, cmd, "received command");

        match cmd.as_str() {
            "start" | "help" => self.reply(HELP_TEXT).await,
            "setalert" => self.cmd_set_alert(owner_id, &args).await,
            "myalerts" => self.cmd_my_alerts(owner_id).await,
            "removealert" => self.cmd_remove_alert(owner_id, &args).await,
            "history" => self.cmd_history(&args).await,
            "price" => self.cmd_price(&args).await,
            _ => {
                self.reply(&format!("❓ Unknown command: /{cmd}\nUse /help for available commands"))
                    .await
            }
        }
    }

    async fn cmd_set_alert(&self, owner_id: u64, args: &[String]) {
        let (Some(netuid), Some(target)) = (
            args.first().and_then(|a| a.parse::<u16>().ok()),
            args.get(1).and_then(|a| a.parse::<Decimal>().ok()),
        ) else {
            self.reply("❌ Usage: /setalert <netuid> <target_price>").await;
            return;
        };

        match self.engine.set_alert(owner_id, netuid, target).await {
            Ok(SetAlertOutcome::Registered {
                record,
                current_price,
                subnet_name,
            }) => {
                self.reply(&format!(
                    "✅ Alert set for Subnet {} ({})!\n\
                     Current Price: {:.4} τ\n\
                     Target Price: {:.4} τ\n\
                     Alert Type: Price {}\n\
                     You will receive a DM when the price reaches this value.",
                    netuid, subnet_name, current_price, record.target_price, record.direction
                ))
                .await;
            }
            Ok(SetAlertOutcome::ImmediateMatch { netuid, price }) => {
                self.reply(&format!(
                    "✅ Subnet {netuid} already trades at {price:.4} τ — alert sent immediately."
                ))
                .await;
            }
            Err(BotError::DeliveryFailed(_)) => {
                self.reply("❌ I couldn't send you a DM. Please start a chat with the bot first.")
                    .await;
            }
            Err(e) => {
                warn!(owner_id, netuid, "setalert failed: {e}");
                self.reply(&format!("❌ {e}")).await;
            }
        }
    }

    async fn cmd_my_alerts(&self, owner_id: u64) {
        let grouped = self.engine.list_alerts(owner_id);
        if grouped.is_empty() {
            self.reply("You have no active price alerts.").await;
            return;
        }

        // subnet names are cosmetic; an unavailable source must not hide the list
        let mut named = Vec::with_capacity(grouped.len());
        for (netuid, records) in grouped {
            let name = match self.engine.price(netuid).await {
                Ok(quote) => quote.name,
                Err(_) => "Unknown".to_string(),
            };
            named.push((netuid, name, records));
        }
        self.reply(&format_alert_list(&named)).await;
    }

    async fn cmd_remove_alert(&self, owner_id: u64, args: &[String]) {
        let Some(netuid) = args.first().and_then(|a| a.parse::<u16>().ok()) else {
            self.reply("❌ Usage: /removealert <netuid>").await;
            return;
        };

        if self.engine.remove_alert(owner_id, netuid).await {
            self.reply(&format!("✅ Alert removed for Subnet {netuid}")).await;
        } else {
            self.reply(&format!("❌ No active alert found for Subnet {netuid}")).await;
        }
    }

    async fn cmd_history(&self, args: &[String]) {
        let netuid = args.first().and_then(|a| a.parse::<u16>().ok());
        let history = self.engine.history(netuid);
        if history.is_empty() {
            self.reply("No alert history available yet.").await;
            return;
        }
        self.reply(&format_history(&history)).await;
    }

    async fn cmd_price(&self, args: &[String]) {
        let Some(netuid) = args.first().and_then(|a| a.parse::<u16>().ok()) else {
            self.reply("❌ Usage: /price <netuid>").await;
            return;
        };

        match self.engine.price(netuid).await {
            Ok(quote) => {
                self.reply(&format!(
                    "Subnet {} ({})\nCurrent Price: {:.4} τ",
                    quote.netuid, quote.name, quote.price
                ))
                .await;
            }
            Err(e) => self.reply(&format!("❌ {e}")).await,
        }
    }

    async fn reply(&self, text: &str) {
        if let Err(e) = self.notifier.send_to(self.chat_id, text).await {
            error!("failed to send Telegram reply: {e}");
        }
    }
}

const HELP_TEXT: &str = "🤖 Subnet Price Alert Bot\n\n\
/setalert <netuid> <target_price> - Register a price alert\n\
/myalerts - List your active alerts\n\
/removealert <netuid> - Remove your alerts on a subnet\n\
/history [netuid] - Show trigger history\n\
/price <netuid> - Current subnet price\n\
/help - Show this message";

/// Split `/cmd arg1 arg2` into a lowercase command and its args.
/// Returns None for non-command chatter.
fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let cmd = parts.next()?;
    // strip an @botname suffix in group chats
    let cmd = cmd.split('@').next().unwrap_or(cmd).to_lowercase();
    let args = parts.map(|s| s.to_string()).collect();
    Some((cmd, args))
}

/// Active alerts grouped by subnet, with each subnet's display name
fn format_alert_list(grouped: &[(u16, String, Vec<AlertRecord>)]) -> String {
    let mut text = String::from("Your Active Price Alerts\n");
    for (netuid, name, records) in grouped {
        text.push_str(&format!("\nSubnet {netuid} ({name}):\n"));
        for record in records {
            text.push_str(&format!(
                "  - Target: {:.4} τ | Initial: {:.4} τ | Type: Price {}\n",
                record.target_price, record.initial_price, record.direction
            ));
        }
    }
    text
}

/// Chronological trigger log, grouped by subnet
fn format_history(
    history: &std::collections::HashMap<u16, Vec<crate::alerts::HistoryEntry>>,
) -> String {
    let mut subnets: Vec<u16> = history.keys().copied().collect();
    subnets.sort_unstable();

    let mut text = String::from("Alert History\n");
    for netuid in subnets {
        text.push_str(&format!("\nSubnet {netuid}\n"));
        for entry in &history[&netuid] {
            text.push_str(&format!(
                "• {} - user {}\n  Target: {:.4} τ | Initial: {:.4} τ | Triggered at: {:.4} τ | Direction: {}\n",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.owner_id,
                entry.target_price,
                entry.initial_price,
                entry.triggered_price,
                entry.direction,
            ));
        }
    }
    text
}
