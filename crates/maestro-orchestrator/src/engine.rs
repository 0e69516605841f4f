use crate::capability::CapabilityRegistry;
use crate::context::ExecutionContext;
use crate::task_queue::{FailureAction, TaskQueue};
use crate::types::{
    AgentRole, ExecutionMode, ExecutionPlan, OrchestratorResult, ProgressEvent, RunStatus, Task,
    TaskStatus,
};
use maestro_broker::MessageBroker;
use maestro_core::{AgentMessage, MaestroError, MaestroResult};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Agent name the engine publishes broker status updates under.
const ORCHESTRATOR_AGENT: &str = "orchestrator";

/// Tuning knobs for the orchestration engine.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Concurrency cap for smart mode (parallel mode is uncapped,
    /// sequential mode is always 1).
    pub max_concurrent_tasks: usize,
    /// How long one dequeue attempt waits before re-evaluating the run.
    pub dequeue_timeout: Duration,
    /// Retry limit stamped onto planned tasks.
    pub default_max_retries: u32,
    /// Base retry delay stamped onto planned tasks.
    pub default_retry_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            dequeue_timeout: Duration::from_millis(250),
            default_max_retries: 1,
            default_retry_delay: Duration::from_millis(500),
        }
    }
}

/// The multi-agent orchestration engine.
///
/// Turns one user request into a dependency-wired task graph
/// ([`Orchestrator::plan`]), executes it under the plan's mode
/// ([`Orchestrator::execute`] / [`Orchestrator::execute_streaming`]),
/// and consolidates per-agent outcomes into one result. Capability
/// bindings and the message broker are injected at construction; each
/// run owns a fresh [`TaskQueue`].
#[derive(Clone)]
pub struct Orchestrator {
    registry: CapabilityRegistry,
    broker: Arc<MessageBroker>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an engine with the given capability bindings and broker.
    pub fn new(registry: CapabilityRegistry, broker: Arc<MessageBroker>) -> Self {
        Self {
            registry,
            broker,
            config: OrchestratorConfig::default(),
        }
    }

    /// Overrides the engine configuration.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// The injected message broker.
    pub fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// Builds an execution plan for a user request.
    ///
    /// Selects the required roles with a lightweight keyword heuristic
    /// (Architect and Engineer are always included), then wires the
    /// fixed delivery skeleton: strategist → architect → engineer →
    /// {ui designer, tester, debugger, documenter} → validator → liaison,
    /// each task depending only on prerequisite roles actually included
    /// in this run.
    pub fn plan(&self, user_request: &str, mode: ExecutionMode) -> MaestroResult<ExecutionPlan> {
        let roles = select_roles(user_request);
        self.plan_with_roles(user_request, &roles, mode)
    }

    /// Builds an execution plan for an explicit set of roles, bypassing
    /// the keyword heuristic.
    pub fn plan_with_roles(
        &self,
        user_request: &str,
        roles: &[AgentRole],
        mode: ExecutionMode,
    ) -> MaestroResult<ExecutionPlan> {
        if user_request.trim().is_empty() {
            return Err(MaestroError::Validation(
                "user request must not be empty".to_string(),
            ));
        }
        if roles.is_empty() {
            return Err(MaestroError::Validation(
                "a plan needs at least one role".to_string(),
            ));
        }

        let included: HashSet<AgentRole> = roles.iter().copied().collect();
        let mut tasks = Vec::new();
        let mut task_ids: HashMap<AgentRole, Uuid> = HashMap::new();
        let mut estimated_secs = 0;
        let mut estimated_cost = 0.0;

        for role in AgentRole::delivery_order() {
            if !included.contains(&role) {
                continue;
            }
            let mut prereqs = Vec::new();
            resolve_prerequisites(role, &included, &mut prereqs);
            let deps: Vec<Uuid> = prereqs
                .iter()
                .filter_map(|prereq| task_ids.get(prereq).copied())
                .collect();

            let task = Task::new(task_description(role, user_request), role)
                .with_priority(role.default_priority())
                .with_dependencies(deps)
                .with_input(json!({ "user_request": user_request }))
                .with_retries(
                    self.config.default_max_retries,
                    self.config.default_retry_delay,
                );
            task_ids.insert(role, task.id);

            let (secs, cost) = role_estimate(role);
            estimated_secs += secs;
            estimated_cost += cost;
            tasks.push(task);
        }

        info!(
            roles = tasks.len(),
            %mode,
            "orchestrator: plan complete"
        );

        Ok(ExecutionPlan {
            plan_id: Uuid::new_v4(),
            tasks,
            mode,
            estimated_duration: Duration::from_secs(estimated_secs),
            estimated_cost,
        })
    }

    /// Executes a plan against a shared run context and returns the
    /// consolidated result.
    ///
    /// A run with failed tasks still returns a complete result with
    /// `Partial` (or `Failed`) status; `Err` is reserved for contract
    /// violations such as an empty plan or a dependency cycle.
    pub async fn execute(
        &self,
        plan: ExecutionPlan,
        context: Arc<ExecutionContext>,
    ) -> MaestroResult<OrchestratorResult> {
        self.execute_inner(plan, context, None).await
    }

    /// Executes a plan like [`Orchestrator::execute`], additionally
    /// yielding incremental [`ProgressEvent`]s as the run advances. The
    /// event stream terminates with
    /// [`ProgressEvent::ExecutionComplete`]; the join handle resolves to
    /// the same consolidated result.
    pub fn execute_streaming(
        &self,
        plan: ExecutionPlan,
        context: Arc<ExecutionContext>,
    ) -> (
        mpsc::Receiver<ProgressEvent>,
        JoinHandle<MaestroResult<OrchestratorResult>>,
    ) {
        let (events, receiver) = mpsc::channel(64);
        let engine = self.clone();
        let handle =
            tokio::spawn(async move { engine.execute_inner(plan, context, Some(events)).await });
        (receiver, handle)
    }

    /// Plans and executes a request in smart mode with a fresh context.
    pub async fn run(&self, user_request: &str) -> MaestroResult<OrchestratorResult> {
        let plan = self.plan(user_request, ExecutionMode::Smart)?;
        let context = Arc::new(ExecutionContext::new("local", "local", user_request));
        self.execute(plan, context).await
    }

    async fn execute_inner(
        &self,
        plan: ExecutionPlan,
        context: Arc<ExecutionContext>,
        events: Option<mpsc::Sender<ProgressEvent>>,
    ) -> MaestroResult<OrchestratorResult> {
        if plan.tasks.is_empty() {
            return Err(MaestroError::Validation(
                "execution plan has no tasks".to_string(),
            ));
        }

        let started = Instant::now();
        let queue = Arc::new(TaskQueue::new());
        let mode = plan.mode;

        info!(
            execution_id = %context.execution_id,
            %mode,
            tasks = plan.tasks.len(),
            "orchestrator: starting run"
        );

        for task in plan.tasks {
            let task = task.for_execution(context.execution_id);
            let task_id = task.id;
            let role = task.role;
            queue.enqueue(task)?;
            emit(&events, ProgressEvent::TaskEnqueued { task_id, role }).await;
        }
        if queue.has_cycle() {
            return Err(MaestroError::Orchestrator(
                "dependency cycle detected in task graph".to_string(),
            ));
        }

        let cap = match mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Smart => self.config.max_concurrent_tasks.max(1),
            ExecutionMode::Parallel => usize::MAX,
        };
        self.drive(&queue, &context, cap, &events).await;

        let result = self.consolidate(&queue, &context, started.elapsed());
        info!(
            execution_id = %context.execution_id,
            status = %result.status,
            completed = result.completed_tasks,
            failed = result.failed_tasks,
            duration_ms = result.execution_time_ms,
            "orchestrator: run complete"
        );
        if events.is_some() {
            emit(
                &events,
                ProgressEvent::ExecutionComplete {
                    result: Box::new(result.clone()),
                },
            )
            .await;
        }
        Ok(result)
    }

    /// The single dependency-driven execution loop shared by all modes,
    /// parameterized by the concurrency cap.
    async fn drive(
        &self,
        queue: &Arc<TaskQueue>,
        context: &Arc<ExecutionContext>,
        cap: usize,
        events: &Option<mpsc::Sender<ProgressEvent>>,
    ) {
        let mut executions: JoinSet<()> = JoinSet::new();
        loop {
            while executions.len() >= cap {
                executions.join_next().await;
                emit_queue_status(events, queue).await;
            }
            if executions.is_empty() && queue.is_idle() {
                break;
            }

            match queue.dequeue(self.config.dequeue_timeout).await {
                Some(task) => self.spawn_execution(&mut executions, task, queue, context, events),
                None => {
                    if !executions.is_empty() {
                        // nothing ready yet; wait for an in-flight task to settle
                        executions.join_next().await;
                        emit_queue_status(events, queue).await;
                        continue;
                    }
                    let stats = queue.get_statistics();
                    if stats.ready > 0 || stats.running > 0 {
                        // a retried task is waiting out its backoff delay
                        continue;
                    }
                    if stats.pending > 0 {
                        warn!(
                            pending = stats.pending,
                            "orchestrator: task deadlock, pending tasks with \
                             unsatisfiable dependencies; cancelling the remainder"
                        );
                        queue.cancel_remaining();
                    }
                    break;
                }
            }
        }
        while executions.join_next().await.is_some() {
            emit_queue_status(events, queue).await;
        }
    }

    fn spawn_execution(
        &self,
        executions: &mut JoinSet<()>,
        task: Task,
        queue: &Arc<TaskQueue>,
        context: &Arc<ExecutionContext>,
        events: &Option<mpsc::Sender<ProgressEvent>>,
    ) {
        let capability = self.registry.get(task.role);
        let queue = Arc::clone(queue);
        let context = Arc::clone(context);
        let broker = Arc::clone(&self.broker);
        let events = events.clone();

        executions.spawn(async move {
            let task_id = task.id;
            let role = task.role;
            info!(%task_id, %role, "executing task");
            emit(&events, ProgressEvent::TaskStarted { task_id, role }).await;
            broker.publish(
                AgentMessage::status_update(
                    ORCHESTRATOR_AGENT,
                    json!({ "task_id": task_id, "role": role, "status": "started" }),
                )
                .for_execution(context.execution_id),
            );

            let outcome = match capability {
                Some(capability) => capability.execute(&task, &context).await,
                None => Err(MaestroError::Capability(format!(
                    "no capability registered for role: {role}"
                ))),
            };

            match outcome {
                Ok(result) => {
                    context.record_event(
                        &role.to_string(),
                        "task_completed",
                        json!({ "task_id": task_id }),
                    );
                    queue.mark_completed(task_id, result);
                    info!(%task_id, %role, "task completed");
                    broker.publish(
                        AgentMessage::status_update(
                            ORCHESTRATOR_AGENT,
                            json!({ "task_id": task_id, "role": role, "status": "completed" }),
                        )
                        .for_execution(context.execution_id),
                    );
                    emit(&events, ProgressEvent::TaskCompleted { task_id, role }).await;
                }
                Err(e) => {
                    let reason = e.to_string();
                    error!(%task_id, %role, error = %reason, "task failed");
                    let action = queue.mark_failed(task_id, &reason);
                    let will_retry = matches!(action, Some(FailureAction::Retry { .. }));
                    context.record_event(
                        &role.to_string(),
                        "task_failed",
                        json!({ "task_id": task_id, "error": reason.clone(), "will_retry": will_retry }),
                    );
                    broker.publish(
                        AgentMessage::status_update(
                            ORCHESTRATOR_AGENT,
                            json!({
                                "task_id": task_id,
                                "role": role,
                                "status": "failed",
                                "will_retry": will_retry,
                            }),
                        )
                        .for_execution(context.execution_id),
                    );
                    emit(
                        &events,
                        ProgressEvent::TaskFailed {
                            task_id,
                            role,
                            error: reason,
                            will_retry,
                        },
                    )
                    .await;
                }
            }
        });
    }

    fn consolidate(
        &self,
        queue: &TaskQueue,
        context: &ExecutionContext,
        elapsed: Duration,
    ) -> OrchestratorResult {
        let snapshot = queue.get_status();
        let stats = &snapshot.statistics;

        let mut results = HashMap::new();
        for role in AgentRole::delivery_order() {
            for task in &snapshot.tasks {
                if task.role == role && task.status == TaskStatus::Completed {
                    if let Some(result) = &task.result {
                        results
                            .entry(role.to_string())
                            .or_insert_with(|| result.clone());
                    }
                }
            }
        }

        let code_base = context.code_base();
        let mut names: Vec<&String> = code_base.keys().collect();
        names.sort();
        let code = names
            .iter()
            .filter_map(|name| {
                code_base
                    .get(*name)
                    .map(|content| format!("// file: {name}\n{content}\n"))
            })
            .collect::<Vec<String>>()
            .join("\n");
        let documentation = context.documentation().unwrap_or_default();

        let status = if stats.completed == 0 {
            RunStatus::Failed
        } else if stats.failed == 0 {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        let summary = format!(
            "Run {status}: {}/{} tasks completed, {} failed, {} skipped",
            stats.completed,
            snapshot.tasks.len(),
            stats.failed,
            stats.skipped,
        );

        OrchestratorResult {
            execution_id: context.execution_id,
            status,
            total_tasks: snapshot.tasks.len(),
            completed_tasks: stats.completed,
            failed_tasks: stats.failed,
            skipped_tasks: stats.skipped,
            results,
            code,
            documentation,
            summary,
            execution_time_ms: elapsed.as_millis() as u64,
            context: context.snapshot(),
        }
    }
}

async fn emit(events: &Option<mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(sender) = events {
        let _ = sender.send(event).await;
    }
}

async fn emit_queue_status(events: &Option<mpsc::Sender<ProgressEvent>>, queue: &TaskQueue) {
    if events.is_some() {
        emit(
            events,
            ProgressEvent::QueueStatus {
                statistics: queue.get_statistics(),
            },
        )
        .await;
    }
}

/// Keyword heuristic selecting the roles a request needs. Architect,
/// Engineer, Tester, Documenter, Validator, and Liaison are always
/// included; the rest are keyword-driven.
fn select_roles(user_request: &str) -> Vec<AgentRole> {
    let request = user_request.to_lowercase();
    // word-level matching: "ui" must not fire on "build"
    let words: HashSet<&str> = request
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    let mut included: HashSet<AgentRole> = [
        AgentRole::Architect,
        AgentRole::Engineer,
        AgentRole::Tester,
        AgentRole::Documenter,
        AgentRole::Validator,
        AgentRole::Liaison,
    ]
    .into_iter()
    .collect();

    let has_any = |keywords: &[&str]| keywords.iter().any(|keyword| words.contains(*keyword));
    if request.len() > 200 || has_any(&["plan", "strategy", "roadmap", "milestone"]) {
        included.insert(AgentRole::Strategist);
    }
    if has_any(&["ui", "interface", "frontend", "page", "dashboard", "screen"]) {
        included.insert(AgentRole::UiDesigner);
    }
    if has_any(&["bug", "fix", "debug", "crash", "regression"]) {
        included.insert(AgentRole::Debugger);
    }

    AgentRole::delivery_order()
        .into_iter()
        .filter(|role| included.contains(role))
        .collect()
}

/// Collects `role`'s prerequisites restricted to the included set,
/// substituting an excluded prerequisite with its own prerequisites.
fn resolve_prerequisites(
    role: AgentRole,
    included: &HashSet<AgentRole>,
    out: &mut Vec<AgentRole>,
) {
    for prereq in role.prerequisites() {
        if included.contains(prereq) {
            if !out.contains(prereq) {
                out.push(*prereq);
            }
        } else {
            resolve_prerequisites(*prereq, included, out);
        }
    }
}

fn task_description(role: AgentRole, user_request: &str) -> String {
    match role {
        AgentRole::Strategist => format!("Define the delivery strategy for: {user_request}"),
        AgentRole::Architect => format!("Design the architecture for: {user_request}"),
        AgentRole::Engineer => format!("Implement: {user_request}"),
        AgentRole::UiDesigner => format!("Design the user interface for: {user_request}"),
        AgentRole::Tester => format!("Write tests for: {user_request}"),
        AgentRole::Debugger => format!("Diagnose and harden: {user_request}"),
        AgentRole::Documenter => format!("Write documentation for: {user_request}"),
        AgentRole::Validator => format!("Validate the combined deliverables for: {user_request}"),
        AgentRole::Liaison => format!("Summarize the outcome of: {user_request}"),
    }
}

/// Fixed per-role heuristic estimates: (seconds, cost units).
const fn role_estimate(role: AgentRole) -> (u64, f64) {
    match role {
        AgentRole::Strategist => (20, 0.05),
        AgentRole::Architect => (30, 0.08),
        AgentRole::Engineer => (60, 0.20),
        AgentRole::UiDesigner => (40, 0.10),
        AgentRole::Tester => (45, 0.12),
        AgentRole::Debugger => (30, 0.08),
        AgentRole::Documenter => (25, 0.06),
        AgentRole::Validator => (20, 0.05),
        AgentRole::Liaison => (10, 0.02),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn engine() -> Orchestrator {
        Orchestrator::new(CapabilityRegistry::new(), Arc::new(MessageBroker::new()))
    }

    #[test]
    fn test_plan_rejects_empty_request() {
        let result = engine().plan("   ", ExecutionMode::Smart);
        assert!(matches!(result, Err(MaestroError::Validation(_))));
    }

    #[test]
    fn test_plan_wires_delivery_skeleton() {
        let plan = engine().plan("Build a REST API", ExecutionMode::Smart).unwrap();
        let by_role: HashMap<AgentRole, &Task> =
            plan.tasks.iter().map(|task| (task.role, task)).collect();

        let architect = by_role[&AgentRole::Architect];
        let engineer = by_role[&AgentRole::Engineer];
        let tester = by_role[&AgentRole::Tester];
        let validator = by_role[&AgentRole::Validator];
        let liaison = by_role[&AgentRole::Liaison];

        // no strategist in this run, so the architect starts the chain
        assert!(architect.dependencies.is_empty());
        assert_eq!(engineer.dependencies, vec![architect.id]);
        assert_eq!(tester.dependencies, vec![engineer.id]);
        // validator depends on the mid-stage roles present in this run
        assert!(validator.dependencies.contains(&tester.id));
        assert_eq!(liaison.dependencies, vec![validator.id]);
    }

    #[test]
    fn test_plan_keyword_roles() {
        let plan = engine()
            .plan("Fix the bug in the dashboard ui", ExecutionMode::Smart)
            .unwrap();
        let roles: Vec<AgentRole> = plan.tasks.iter().map(|task| task.role).collect();
        assert!(roles.contains(&AgentRole::Debugger));
        assert!(roles.contains(&AgentRole::UiDesigner));
        assert!(!roles.contains(&AgentRole::Strategist));
    }

    #[test]
    fn test_plan_transitive_prerequisite_fallback() {
        let plan = engine()
            .plan_with_roles(
                "Document the module",
                &[AgentRole::Engineer, AgentRole::Documenter],
                ExecutionMode::Sequential,
            )
            .unwrap();
        let by_role: HashMap<AgentRole, &Task> =
            plan.tasks.iter().map(|task| (task.role, task)).collect();

        // architect excluded: engineer inherits an empty prerequisite set
        assert!(by_role[&AgentRole::Engineer].dependencies.is_empty());
        assert_eq!(
            by_role[&AgentRole::Documenter].dependencies,
            vec![by_role[&AgentRole::Engineer].id]
        );
    }

    #[test]
    fn test_plan_estimates_accumulate() {
        let plan = engine().plan("Build it", ExecutionMode::Smart).unwrap();
        assert!(plan.estimated_duration > Duration::ZERO);
        assert!(plan.estimated_cost > 0.0);
    }

    #[test]
    fn test_plan_task_priorities() {
        let plan = engine().plan("Build it", ExecutionMode::Smart).unwrap();
        for task in &plan.tasks {
            assert_eq!(task.priority, task.role.default_priority());
        }
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_plan() {
        let plan = ExecutionPlan {
            plan_id: Uuid::new_v4(),
            tasks: Vec::new(),
            mode: ExecutionMode::Smart,
            estimated_duration: Duration::ZERO,
            estimated_cost: 0.0,
        };
        let context = Arc::new(ExecutionContext::new("u", "s", "req"));
        let result = engine().execute(plan, context).await;
        assert!(matches!(result, Err(MaestroError::Validation(_))));
    }

    #[tokio::test]
    async fn test_execute_rejects_cyclic_plan() {
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let mut t1 = Task::new("a", AgentRole::Engineer);
        t1.id = id1;
        t1.dependencies = vec![id2];
        let mut t2 = Task::new("b", AgentRole::Tester);
        t2.id = id2;
        t2.dependencies = vec![id1];

        let plan = ExecutionPlan {
            plan_id: Uuid::new_v4(),
            tasks: vec![t1, t2],
            mode: ExecutionMode::Smart,
            estimated_duration: Duration::ZERO,
            estimated_cost: 0.0,
        };
        let context = Arc::new(ExecutionContext::new("u", "s", "req"));
        let result = engine().execute(plan, context).await;
        assert!(matches!(result, Err(MaestroError::Orchestrator(_))));
    }
}
