//! Subnet Price Alert Bot
//!
//! Watches externally-priced subnets and notifies users when a price crosses
//! a target they registered.
//!
//! ## Architecture
//!
//! ```text
//! Telegram commands → AlertEngine → AlertStore ──→ Persister (JSON files)
//!                          │            ↑
//!                     PriceSource   Evaluation loop (ticks) → Notifier
//!                                                   │
//!                                              AlertHistory
//! ```
//!
//! The engine owns the only shared mutable state; command handlers and the
//! evaluation loop interact with it exclusively through its operations.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod source;
pub mod storage;
pub mod telegram;
