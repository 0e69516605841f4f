use crate::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of inter-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Asks another agent to do something and expects a response.
    Request,
    /// Answers a prior [`MessageType::Request`].
    Response,
    /// One-way informational message.
    Notification,
    /// Reports an error condition to another agent.
    Error,
    /// Progress or lifecycle update, typically broadcast.
    StatusUpdate,
    /// Carries a produced artifact (code, document, data).
    Artifact,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
            Self::Notification => write!(f, "notification"),
            Self::Error => write!(f, "error"),
            Self::StatusUpdate => write!(f, "status_update"),
            Self::Artifact => write!(f, "artifact"),
        }
    }
}

/// A single message exchanged between agents through the broker.
///
/// A message with `to_agent = None` is a broadcast, delivered to every
/// agent subscribed to its [`MessageType`] except the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// Name of the sending agent.
    pub from_agent: String,
    /// Name of the receiving agent, or `None` for a broadcast.
    pub to_agent: Option<String>,
    /// Kind of message.
    pub message_type: MessageType,
    /// Informational priority; mailbox delivery stays FIFO.
    pub priority: Priority,
    /// Opaque payload.
    pub content: serde_json::Value,
    /// Id of the request this message answers, when it is a response.
    pub response_to: Option<Uuid>,
    /// Correlates the message to one orchestration run.
    pub execution_id: Option<Uuid>,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Creates a new message of the given type.
    pub fn new(
        message_type: MessageType,
        from_agent: impl Into<String>,
        to_agent: Option<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from_agent.into(),
            to_agent,
            message_type,
            priority: Priority::Normal,
            content,
            response_to: None,
            execution_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a direct [`MessageType::Request`].
    pub fn request(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::new(
            MessageType::Request,
            from_agent,
            Some(to_agent.into()),
            content,
        )
    }

    /// Creates a [`MessageType::Response`] answering `request_id`.
    pub fn response(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        request_id: Uuid,
        content: serde_json::Value,
    ) -> Self {
        let mut msg = Self::new(
            MessageType::Response,
            from_agent,
            Some(to_agent.into()),
            content,
        );
        msg.response_to = Some(request_id);
        msg
    }

    /// Creates a broadcast [`MessageType::Notification`].
    pub fn notification(from_agent: impl Into<String>, content: serde_json::Value) -> Self {
        Self::new(MessageType::Notification, from_agent, None, content)
    }

    /// Creates a broadcast [`MessageType::StatusUpdate`].
    pub fn status_update(from_agent: impl Into<String>, content: serde_json::Value) -> Self {
        Self::new(MessageType::StatusUpdate, from_agent, None, content)
    }

    /// Sets the message priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Correlates the message to an orchestration run.
    pub fn for_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// True when the message is addressed to all subscribers of its type.
    pub const fn is_broadcast(&self) -> bool {
        self.to_agent.is_none()
    }
}
