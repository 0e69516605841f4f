//! Message broker for inter-agent communication.
//!
//! Decouples agents so they communicate by name, not by direct reference.
//! Supports direct (point-to-point) delivery, publish/subscribe broadcast
//! by message type, and a request-response pattern built on correlation
//! ids with per-request timeouts.
//!
//! # Main types
//!
//! - [`MessageBroker`] — Routes messages between named agent mailboxes.
//! - [`BrokerStatistics`] — Counters exposed by [`MessageBroker::get_statistics`].
//! - [`HistoryFilter`] — Filter for [`MessageBroker::get_message_history`].

/// Broker implementation: mailboxes, subscriptions, request waiters.
pub mod broker;

pub use broker::{BrokerStatistics, HistoryFilter, MessageBroker};
