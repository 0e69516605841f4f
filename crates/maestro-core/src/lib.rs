//! Core types and error definitions for the Maestro orchestration framework.
//!
//! This crate provides the foundational types shared across all Maestro
//! crates: the unified error enum, the inter-agent message model, and the
//! priority scale used by both tasks and messages.
//!
//! # Main types
//!
//! - [`MaestroError`] — Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`] — Convenience alias for `Result<T, MaestroError>`.
//! - [`Priority`] — Ordinal priority scale shared by tasks and messages.
//! - [`AgentMessage`] — A point-to-point or broadcast inter-agent message.
//! - [`MessageType`] — Kind of inter-agent message (request, response, ...).

/// Inter-agent message types and constructors.
pub mod message;

pub use message::{AgentMessage, MessageType};

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for the Maestro framework.
///
/// Each variant corresponds to a subsystem that can produce errors.
/// Expected failure paths (agent errors, timeouts, dependency cascades)
/// are represented as task/message state, not as this type; `MaestroError`
/// is reserved for contract violations and infrastructure faults.
#[derive(Debug, thiserror::Error)]
pub enum MaestroError {
    /// An error from the multi-agent orchestration engine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// An error from the message broker.
    #[error("Broker error: {0}")]
    Broker(String),

    /// An error raised by an agent capability during invocation.
    #[error("Capability error: {0}")]
    Capability(String),

    /// A programming-contract violation caught at a call site
    /// (e.g. enqueuing a malformed task).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

// --- Priority ---

/// Ordinal priority scale shared by tasks and messages.
///
/// Higher priorities execute first among simultaneously ready tasks.
/// For messages the priority is informational; mailbox order stays FIFO.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work, scheduled last.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Scheduled ahead of normal work.
    High,
    /// Scheduled first.
    Critical,
}

impl Priority {
    /// Numeric weight of this priority (low=1, normal=5, high=8, critical=10).
    pub const fn weight(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 5,
            Self::High => 8,
            Self::Critical => 10,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn test_priority_weights() {
        assert_eq!(Priority::Low.weight(), 1);
        assert_eq!(Priority::Normal.weight(), 5);
        assert_eq!(Priority::High.weight(), 8);
        assert_eq!(Priority::Critical.weight(), 10);
    }

    #[test]
    fn test_priority_default() {
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_serialization() {
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let parsed: Priority = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Priority::Critical);
    }

    #[test]
    fn test_error_display() {
        let err = MaestroError::Validation("task has no description".to_string());
        assert!(err.to_string().contains("Validation error"));
    }
}
