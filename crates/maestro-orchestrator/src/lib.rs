//! Multi-agent task orchestration engine.
//!
//! Turns one user request into a dependency-ordered task graph, executes
//! it with pluggable agent capabilities under a chosen strategy
//! (sequential, parallel, or dependency-driven smart mode), and produces
//! one consolidated result. Retry, cascade, and priority semantics live
//! in the [`TaskQueue`]; inter-agent communication outside the task graph
//! goes through the injected `maestro-broker` instance.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Top-level engine: plan, execute, stream progress.
//! - [`TaskQueue`] — Priority queue with dependency resolution and retry.
//! - [`ExecutionContext`] — Shared per-run state written by agents.
//! - [`CapabilityRegistry`] — Maps [`AgentRole`]s to typed handlers.
//! - [`Task`] / [`ExecutionPlan`] / [`OrchestratorResult`] — The data model.

/// Agent capability contract and registry.
pub mod capability;
/// Shared per-run execution context and event timeline.
pub mod context;
/// Orchestration engine: planning, execution modes, consolidation.
pub mod engine;
/// Priority task queue with dependency resolution and retry.
pub mod task_queue;
/// Shared orchestration types (Task, ExecutionPlan, results, events).
pub mod types;

pub use capability::{AgentCapability, CapabilityRegistry};
pub use context::{ContextEvent, ContextSnapshot, ExecutionContext};
pub use engine::{Orchestrator, OrchestratorConfig};
pub use task_queue::{FailureAction, QueueSnapshot, TaskQueue};
pub use types::{
    AgentRole, ExecutionMode, ExecutionPlan, OrchestratorResult, ProgressEvent, QueueStatistics,
    RunStatus, Task, TaskStatus,
};
