use crate::context::ContextSnapshot;
use chrono::{DateTime, Utc};
use maestro_core::Priority;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Role of each specialized agent in the multi-agent system.
///
/// A closed set: capability resolution maps roles to typed handlers once
/// at orchestrator construction, never via runtime string lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Defines the delivery strategy for the request.
    Strategist,
    /// Designs the system architecture.
    Architect,
    /// Implements the code.
    Engineer,
    /// Designs the user interface.
    UiDesigner,
    /// Writes and runs tests.
    Tester,
    /// Diagnoses and hardens failure paths.
    Debugger,
    /// Writes documentation.
    Documenter,
    /// Validates the combined deliverables.
    Validator,
    /// Summarizes outcomes for the requester.
    Liaison,
}

impl AgentRole {
    /// Natural software-delivery order, used for dependency wiring in
    /// planning and for result consolidation.
    pub const fn delivery_order() -> [Self; 9] {
        [
            Self::Strategist,
            Self::Architect,
            Self::Engineer,
            Self::UiDesigner,
            Self::Tester,
            Self::Debugger,
            Self::Documenter,
            Self::Validator,
            Self::Liaison,
        ]
    }

    /// Direct prerequisites of this role within the delivery skeleton.
    pub const fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::Strategist => &[],
            Self::Architect => &[Self::Strategist],
            Self::Engineer => &[Self::Architect],
            Self::UiDesigner | Self::Tester | Self::Debugger | Self::Documenter => {
                &[Self::Engineer]
            }
            Self::Validator => &[
                Self::UiDesigner,
                Self::Tester,
                Self::Debugger,
                Self::Documenter,
            ],
            Self::Liaison => &[Self::Validator],
        }
    }

    /// Default scheduling priority for tasks of this role.
    pub const fn default_priority(self) -> Priority {
        match self {
            Self::Strategist | Self::Architect | Self::Engineer => Priority::High,
            Self::Liaison => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strategist => write!(f, "strategist"),
            Self::Architect => write!(f, "architect"),
            Self::Engineer => write!(f, "engineer"),
            Self::UiDesigner => write!(f, "ui_designer"),
            Self::Tester => write!(f, "tester"),
            Self::Debugger => write!(f, "debugger"),
            Self::Documenter => write!(f, "documenter"),
            Self::Validator => write!(f, "validator"),
            Self::Liaison => write!(f, "liaison"),
        }
    }
}

/// Status of a task in its lifecycle.
///
/// Terminal states: `Completed`, `Failed`, `Cancelled`, `Skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on unsatisfied dependencies.
    Pending,
    /// All dependencies satisfied, eligible for dequeue.
    Ready,
    /// Dequeued and currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed permanently (retries exhausted or cascaded).
    Failed {
        /// What went wrong, traceable to the root cause for cascades.
        reason: String,
    },
    /// Cancelled before it started running.
    Cancelled,
    /// Skipped because a non-blocking dependency failed.
    Skipped,
}

impl TaskStatus {
    /// True for states a task can never leave.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::Cancelled | Self::Skipped
        )
    }

    /// True when a dependency in this state counts as satisfied for its
    /// dependents (`Completed` and `Skipped`).
    pub const fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// One unit of work for one agent capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, stable for the task's lifetime.
    pub id: Uuid,
    /// Capability required to execute this task.
    pub role: AgentRole,
    /// Human-readable summary of the work.
    pub description: String,
    /// Opaque payload passed to the agent capability.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Scheduling priority among simultaneously ready tasks.
    pub priority: Priority,
    /// Task ids that must reach `Completed` or `Skipped` first.
    pub dependencies: Vec<Uuid>,
    /// When true, a permanently failed dependency fails this task too;
    /// when false, this task is skipped instead (and a skip still
    /// satisfies its own dependents).
    pub blocking: bool,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Outcome payload, set on successful completion.
    pub result: Option<serde_json::Value>,
    /// Most recent failure reason, including retried attempts.
    pub error: Option<String>,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Maximum retries before the task fails permanently.
    pub max_retries: u32,
    /// Base delay between retries; attempt `n` waits `retry_delay * n`.
    pub retry_delay: Duration,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task last started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Correlates the task to one orchestration run.
    pub execution_id: Option<Uuid>,
}

impl Task {
    /// Creates a pending task with default priority and no retries.
    pub fn new(description: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            description: description.into(),
            input: serde_json::Value::Null,
            priority: Priority::Normal,
            dependencies: Vec::new(),
            blocking: true,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: 0,
            retry_delay: Duration::from_millis(500),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_id: None,
        }
    }

    /// Sets the task ids this task depends on.
    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the opaque input payload.
    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Sets the retry policy.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Marks the task as non-blocking: a failed dependency skips it
    /// instead of failing it.
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    /// Correlates the task to an orchestration run.
    pub fn for_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Wall-clock execution time, once started and finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// True when a dependency in this task's current state counts as
    /// satisfied for its dependents.
    pub const fn satisfies_dependents(&self) -> bool {
        self.status.satisfies_dependents()
    }
}

/// Strategy governing how the orchestrator drains the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One task at a time, each awaited before the next dequeue.
    Sequential,
    /// Dependency-driven with unbounded concurrent fan-out.
    Parallel,
    /// Dependency-driven with a configured concurrency cap; the
    /// reference semantics for arbitrary graphs.
    Smart,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Smart => write!(f, "smart"),
        }
    }
}

/// A planned task graph ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Unique identifier for this plan.
    pub plan_id: Uuid,
    /// Tasks in delivery order, dependencies wired by id.
    pub tasks: Vec<Task>,
    /// Strategy to drain the queue with.
    pub mode: ExecutionMode,
    /// Heuristic total duration estimate (sequential worst case).
    pub estimated_duration: Duration,
    /// Heuristic total cost estimate.
    pub estimated_cost: f64,
}

/// Overall outcome of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every task that ran completed; none failed.
    Success,
    /// Some tasks completed and some failed.
    Partial,
    /// Zero tasks completed.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Counters describing queue state, suitable for JSON serialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatistics {
    /// Tasks currently known to the queue.
    pub total_tasks: usize,
    /// Tasks accepted by `enqueue` over the queue's lifetime.
    pub enqueued_total: u64,
    /// Tasks waiting on dependencies.
    pub pending: usize,
    /// Tasks eligible for dequeue.
    pub ready: usize,
    /// Tasks currently executing.
    pub running: usize,
    /// Tasks finished successfully.
    pub completed: usize,
    /// Tasks failed permanently.
    pub failed: usize,
    /// Tasks cancelled before starting.
    pub cancelled: usize,
    /// Tasks skipped via non-blocking dependency failure.
    pub skipped: usize,
    /// `completed / enqueued_total`, 0.0 for an empty queue.
    pub success_rate: f64,
}

/// Consolidated result of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResult {
    /// The run this result belongs to.
    pub execution_id: Uuid,
    /// Overall outcome.
    pub status: RunStatus,
    /// Tasks planned for the run.
    pub total_tasks: usize,
    /// Tasks that completed.
    pub completed_tasks: usize,
    /// Tasks that failed permanently (including cascades).
    pub failed_tasks: usize,
    /// Tasks skipped via non-blocking dependency failure.
    pub skipped_tasks: usize,
    /// Per-role result payloads, keyed by role name in delivery order.
    pub results: HashMap<String, serde_json::Value>,
    /// Concatenated code files produced during the run.
    pub code: String,
    /// Documentation produced during the run.
    pub documentation: String,
    /// Human-readable one-line summary.
    pub summary: String,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    /// Final snapshot of the shared execution context.
    pub context: ContextSnapshot,
}

/// Incremental progress event yielded by the streaming execution API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A task was accepted into the queue.
    TaskEnqueued {
        /// The enqueued task.
        task_id: Uuid,
        /// Its required capability.
        role: AgentRole,
    },
    /// A task started executing.
    TaskStarted {
        /// The started task.
        task_id: Uuid,
        /// Its required capability.
        role: AgentRole,
    },
    /// A task completed successfully.
    TaskCompleted {
        /// The completed task.
        task_id: Uuid,
        /// Its required capability.
        role: AgentRole,
    },
    /// A task attempt failed.
    TaskFailed {
        /// The failed task.
        task_id: Uuid,
        /// Its required capability.
        role: AgentRole,
        /// The failure reason.
        error: String,
        /// Whether a retry was scheduled.
        will_retry: bool,
    },
    /// Queue counters after a task settled.
    QueueStatus {
        /// Snapshot of the queue counters.
        statistics: QueueStatistics,
    },
    /// Terminal event carrying the consolidated result.
    ExecutionComplete {
        /// The final result of the run.
        result: Box<OrchestratorResult>,
    },
}
