use maestro_core::{AgentMessage, MessageType, Priority};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_MAILBOX_CAPACITY: usize = 1024;
const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Counters describing broker activity, suitable for JSON serialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerStatistics {
    /// Total messages accepted by [`MessageBroker::publish`].
    pub messages_sent: u64,
    /// Total messages pushed into a mailbox (direct + broadcast copies).
    pub messages_delivered: u64,
    /// Total broadcast publishes (messages with no recipient).
    pub messages_broadcast: u64,
    /// Requests issued through the request-response pattern.
    pub requests_sent: u64,
    /// Responses that resolved an outstanding request waiter.
    pub responses_matched: u64,
    /// Requests that timed out without a matching response.
    pub request_timeouts: u64,
    /// Messages dropped because a mailbox exceeded its capacity.
    pub dropped_messages: u64,
    /// Number of mailboxes currently known to the broker.
    pub active_mailboxes: usize,
    /// Number of messages retained in the history ring.
    pub history_size: usize,
}

/// Filter applied by [`MessageBroker::get_message_history`].
///
/// All fields are optional; an empty filter matches every message.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Match only messages sent by this agent.
    pub from_agent: Option<String>,
    /// Match only messages addressed to this agent.
    pub to_agent: Option<String>,
    /// Match only messages of this type.
    pub message_type: Option<MessageType>,
}

impl HistoryFilter {
    fn matches(&self, message: &AgentMessage) -> bool {
        if let Some(from) = &self.from_agent {
            if &message.from_agent != from {
                return false;
            }
        }
        if let Some(to) = &self.to_agent {
            if message.to_agent.as_ref() != Some(to) {
                return false;
            }
        }
        if let Some(kind) = self.message_type {
            if message.message_type != kind {
                return false;
            }
        }
        true
    }
}

struct Mailbox {
    queue: VecDeque<AgentMessage>,
    notify: Arc<Notify>,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    mailboxes: HashMap<String, Mailbox>,
    subscriptions: HashMap<MessageType, Vec<String>>,
    pending: HashMap<Uuid, oneshot::Sender<AgentMessage>>,
    history: VecDeque<AgentMessage>,
    stats: BrokerStatistics,
}

/// Routes [`AgentMessage`]s between named agent mailboxes.
///
/// Explicitly constructed and dependency-injected: one broker per server
/// process (or per test), torn down with [`MessageBroker::reset`]. There
/// is no ambient global instance.
///
/// Mailboxes are bounded: when a mailbox exceeds its capacity the oldest
/// message is dropped, a warning is logged, and `dropped_messages` is
/// incremented in [`BrokerStatistics`] — overflow is never silent.
pub struct MessageBroker {
    state: Mutex<BrokerState>,
    mailbox_capacity: usize,
    history_limit: usize,
}

impl MessageBroker {
    /// Creates a broker with default mailbox capacity (1024) and history
    /// ring size (1000).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Sets the per-mailbox capacity.
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Sets the history ring size.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Records and routes a message.
    ///
    /// A message with a recipient goes to that agent's mailbox (created on
    /// demand). A broadcast goes to the mailbox of every agent subscribed
    /// to the message's type, excluding the sender. A response whose
    /// `response_to` matches an outstanding request waiter additionally
    /// resolves that waiter.
    pub fn publish(&self, message: AgentMessage) {
        let mut state = self.state.lock();
        state.stats.messages_sent += 1;

        state.history.push_back(message.clone());
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }

        if message.message_type == MessageType::Response {
            if let Some(request_id) = message.response_to {
                if let Some(waiter) = state.pending.remove(&request_id) {
                    if waiter.send(message.clone()).is_ok() {
                        state.stats.responses_matched += 1;
                    }
                }
            }
        }

        match &message.to_agent {
            Some(recipient) => {
                let recipient = recipient.clone();
                self.deliver_locked(&mut state, &recipient, message);
            }
            None => {
                state.stats.messages_broadcast += 1;
                let recipients: Vec<String> = state
                    .subscriptions
                    .get(&message.message_type)
                    .map(|subscribers| {
                        subscribers
                            .iter()
                            .filter(|agent| **agent != message.from_agent)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                for recipient in recipients {
                    self.deliver_locked(&mut state, &recipient, message.clone());
                }
            }
        }
    }

    fn deliver_locked(&self, state: &mut BrokerState, recipient: &str, message: AgentMessage) {
        let mailbox = state
            .mailboxes
            .entry(recipient.to_string())
            .or_insert_with(Mailbox::new);

        let mut dropped = false;
        if mailbox.queue.len() >= self.mailbox_capacity {
            mailbox.queue.pop_front();
            dropped = true;
        }
        mailbox.queue.push_back(message);
        mailbox.notify.notify_one();

        state.stats.messages_delivered += 1;
        if dropped {
            state.stats.dropped_messages += 1;
            warn!(recipient, "mailbox over capacity, dropping oldest message");
        }
    }

    /// Subscribes an agent to broadcasts of the given message types.
    /// Idempotent: subscribing twice has no additional effect.
    pub fn subscribe(&self, agent: &str, message_types: &[MessageType]) {
        let mut state = self.state.lock();
        for kind in message_types {
            let subscribers = state.subscriptions.entry(*kind).or_default();
            if !subscribers.iter().any(|existing| existing == agent) {
                subscribers.push(agent.to_string());
            }
        }
        debug!(agent, types = message_types.len(), "agent subscribed");
    }

    /// Removes an agent's subscription to the given message types.
    pub fn unsubscribe(&self, agent: &str, message_types: &[MessageType]) {
        let mut state = self.state.lock();
        for kind in message_types {
            if let Some(subscribers) = state.subscriptions.get_mut(kind) {
                subscribers.retain(|existing| existing != agent);
            }
        }
    }

    /// Drains and returns every message queued for `agent`.
    pub fn get_messages(&self, agent: &str) -> Vec<AgentMessage> {
        let mut state = self.state.lock();
        state
            .mailboxes
            .get_mut(agent)
            .map(|mailbox| mailbox.queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Waits up to `timeout` for the next message addressed to `agent`.
    ///
    /// Returns `None` when no message arrives in time — a normal outcome,
    /// not an error. Wakes immediately when a message is delivered.
    pub async fn get_next_message(&self, agent: &str, timeout: Duration) -> Option<AgentMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notify = {
                let mut state = self.state.lock();
                let mailbox = state
                    .mailboxes
                    .entry(agent.to_string())
                    .or_insert_with(Mailbox::new);
                if let Some(message) = mailbox.queue.pop_front() {
                    return Some(message);
                }
                Arc::clone(&mailbox.notify)
            };
            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Sends a request from `from` to `to` and waits up to `timeout` for a
    /// response correlated to the request's id.
    ///
    /// Returns `None` on timeout; the waiter registration is removed so a
    /// late response is delivered to the mailbox but resolves nothing.
    pub async fn request_response(
        &self,
        from: &str,
        to: &str,
        content: serde_json::Value,
        timeout: Duration,
        priority: Priority,
    ) -> Option<AgentMessage> {
        let request = AgentMessage::request(from, to, content).with_priority(priority);
        let request_id = request.id;

        let (waiter, receiver) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.pending.insert(request_id, waiter);
            state.stats.requests_sent += 1;
        }

        self.publish(request);

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => Some(response),
            _ => {
                let mut state = self.state.lock();
                state.pending.remove(&request_id);
                state.stats.request_timeouts += 1;
                debug!(%request_id, from, to, "request timed out");
                None
            }
        }
    }

    /// Constructs and publishes a response to `request_id`.
    pub fn send_response(
        &self,
        to: &str,
        request_id: Uuid,
        content: serde_json::Value,
        from: &str,
    ) {
        self.publish(AgentMessage::response(from, to, request_id, content));
    }

    /// Number of messages currently queued for `agent`.
    pub fn get_mailbox_size(&self, agent: &str) -> usize {
        let state = self.state.lock();
        state
            .mailboxes
            .get(agent)
            .map_or(0, |mailbox| mailbox.queue.len())
    }

    /// Snapshot of broker counters.
    pub fn get_statistics(&self) -> BrokerStatistics {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.active_mailboxes = state.mailboxes.len();
        stats.history_size = state.history.len();
        stats
    }

    /// Returns up to `limit` of the most recent messages matching `filter`,
    /// oldest first.
    pub fn get_message_history(&self, filter: &HistoryFilter, limit: usize) -> Vec<AgentMessage> {
        let state = self.state.lock();
        let mut matched: Vec<AgentMessage> = state
            .history
            .iter()
            .filter(|message| filter.matches(message))
            .cloned()
            .collect();
        if matched.len() > limit {
            matched.split_off(matched.len() - limit)
        } else {
            matched
        }
    }

    /// Discards every message queued for `agent`. Returns the number removed.
    pub fn clear_mailbox(&self, agent: &str) -> usize {
        let mut state = self.state.lock();
        state.mailboxes.get_mut(agent).map_or(0, |mailbox| {
            let removed = mailbox.queue.len();
            mailbox.queue.clear();
            removed
        })
    }

    /// Resets all broker state: mailboxes, subscriptions, outstanding
    /// request waiters, history, and statistics.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = BrokerState::default();
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_direct_delivery() {
        let broker = MessageBroker::new();
        broker.publish(AgentMessage::request("a", "b", json!("hello")));

        assert_eq!(broker.get_mailbox_size("b"), 1);
        let messages = broker.get_messages("b");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, json!("hello"));
        assert_eq!(broker.get_mailbox_size("b"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers_not_sender() {
        let broker = MessageBroker::new();
        broker.subscribe("a", &[MessageType::StatusUpdate]);
        broker.subscribe("b", &[MessageType::StatusUpdate]);
        broker.subscribe("c", &[MessageType::Notification]);

        broker.publish(AgentMessage::status_update("a", json!("progress")));

        // sender excluded, wrong-type subscriber excluded
        assert_eq!(broker.get_mailbox_size("a"), 0);
        assert_eq!(broker.get_mailbox_size("b"), 1);
        assert_eq!(broker.get_mailbox_size("c"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = MessageBroker::new();
        broker.subscribe("b", &[MessageType::Notification]);
        broker.subscribe("b", &[MessageType::Notification]);

        broker.publish(AgentMessage::notification("a", json!("once")));
        assert_eq!(broker.get_mailbox_size("b"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MessageBroker::new();
        broker.subscribe("b", &[MessageType::Notification]);
        broker.unsubscribe("b", &[MessageType::Notification]);

        broker.publish(AgentMessage::notification("a", json!("gone")));
        assert_eq!(broker.get_mailbox_size("b"), 0);
    }

    #[tokio::test]
    async fn test_get_next_message_wakes_on_delivery() {
        let broker = Arc::new(MessageBroker::new());

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                broker
                    .get_next_message("b", Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish(AgentMessage::request("a", "b", json!("wake up")));

        let message = waiter.await.unwrap();
        assert_eq!(message.unwrap().content, json!("wake up"));
    }

    #[tokio::test]
    async fn test_get_next_message_times_out() {
        let broker = MessageBroker::new();
        let result = broker
            .get_next_message("nobody", Duration::from_millis(50))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let broker = Arc::new(MessageBroker::new());

        let responder = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                let request = broker
                    .get_next_message("architect", Duration::from_secs(5))
                    .await
                    .unwrap();
                broker.send_response(
                    "engineer",
                    request.id,
                    json!("use a layered design"),
                    "architect",
                );
            })
        };

        let response = broker
            .request_response(
                "engineer",
                "architect",
                json!("which design?"),
                Duration::from_secs(5),
                Priority::Normal,
            )
            .await;

        responder.await.unwrap();
        let response = response.unwrap();
        assert_eq!(response.message_type, MessageType::Response);
        assert_eq!(response.content, json!("use a layered design"));
        assert_eq!(broker.get_statistics().responses_matched, 1);
    }

    #[tokio::test]
    async fn test_request_response_timeout_removes_waiter() {
        let broker = MessageBroker::new();

        let response = broker
            .request_response(
                "engineer",
                "architect",
                json!("anyone there?"),
                Duration::from_millis(50),
                Priority::Normal,
            )
            .await;
        assert!(response.is_none());
        assert_eq!(broker.get_statistics().request_timeouts, 1);

        // A late response is delivered to the mailbox but resolves nothing.
        let request = broker.get_messages("architect").remove(0);
        broker.send_response("engineer", request.id, json!("too late"), "architect");
        assert_eq!(broker.get_statistics().responses_matched, 0);
        assert_eq!(broker.get_mailbox_size("engineer"), 1);
    }

    #[tokio::test]
    async fn test_response_also_delivered_to_mailbox() {
        let broker = Arc::new(MessageBroker::new());

        let responder = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                let request = broker
                    .get_next_message("b", Duration::from_secs(5))
                    .await
                    .unwrap();
                broker.send_response("a", request.id, json!("answer"), "b");
            })
        };

        let response = broker
            .request_response("a", "b", json!("?"), Duration::from_secs(5), Priority::Low)
            .await;
        responder.await.unwrap();

        assert!(response.is_some());
        // normal mailbox delivery happened in addition to waiter resolution
        assert_eq!(broker.get_mailbox_size("a"), 1);
    }

    #[tokio::test]
    async fn test_mailbox_overflow_drops_oldest() {
        let broker = MessageBroker::new().with_mailbox_capacity(2);
        broker.publish(AgentMessage::request("a", "b", json!(1)));
        broker.publish(AgentMessage::request("a", "b", json!(2)));
        broker.publish(AgentMessage::request("a", "b", json!(3)));

        assert_eq!(broker.get_mailbox_size("b"), 2);
        assert_eq!(broker.get_statistics().dropped_messages, 1);
        let messages = broker.get_messages("b");
        assert_eq!(messages[0].content, json!(2));
        assert_eq!(messages[1].content, json!(3));
    }

    #[tokio::test]
    async fn test_history_filter_and_limit() {
        let broker = MessageBroker::new();
        broker.publish(AgentMessage::request("a", "b", json!(1)));
        broker.publish(AgentMessage::request("a", "c", json!(2)));
        broker.publish(AgentMessage::request("x", "b", json!(3)));

        let from_a = broker.get_message_history(
            &HistoryFilter {
                from_agent: Some("a".to_string()),
                ..HistoryFilter::default()
            },
            10,
        );
        assert_eq!(from_a.len(), 2);

        let to_b = broker.get_message_history(
            &HistoryFilter {
                to_agent: Some("b".to_string()),
                ..HistoryFilter::default()
            },
            1,
        );
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].content, json!(3));
    }

    #[tokio::test]
    async fn test_history_ring_is_bounded() {
        let broker = MessageBroker::new().with_history_limit(5);
        for i in 0..10 {
            broker.publish(AgentMessage::request("a", "b", json!(i)));
        }
        let history = broker.get_message_history(&HistoryFilter::default(), 100);
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].content, json!(5));
    }

    #[tokio::test]
    async fn test_clear_mailbox_and_reset() {
        let broker = MessageBroker::new();
        broker.subscribe("b", &[MessageType::Notification]);
        broker.publish(AgentMessage::request("a", "b", json!(1)));
        broker.publish(AgentMessage::request("a", "b", json!(2)));

        assert_eq!(broker.clear_mailbox("b"), 2);
        assert_eq!(broker.get_mailbox_size("b"), 0);

        broker.reset();
        let stats = broker.get_statistics();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.active_mailboxes, 0);
        assert_eq!(stats.history_size, 0);

        // subscription registry was cleared too
        broker.publish(AgentMessage::notification("a", json!("after reset")));
        assert_eq!(broker.get_mailbox_size("b"), 0);
    }

    #[tokio::test]
    async fn test_statistics_counts() {
        let broker = MessageBroker::new();
        broker.subscribe("b", &[MessageType::StatusUpdate]);
        broker.subscribe("c", &[MessageType::StatusUpdate]);

        broker.publish(AgentMessage::request("a", "b", json!("direct")));
        broker.publish(AgentMessage::status_update("a", json!("fanout")));

        let stats = broker.get_statistics();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_broadcast, 1);
        // 1 direct + 2 broadcast copies
        assert_eq!(stats.messages_delivered, 3);
    }
}
