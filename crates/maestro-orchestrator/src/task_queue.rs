use crate::types::{QueueStatistics, Task, TaskStatus};
use chrono::Utc;
use maestro_core::{MaestroError, MaestroResult, Priority};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Outcome of reporting a task failure to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    /// A retry was scheduled; the task re-enters the ready structure
    /// after the linear-backoff delay.
    Retry {
        /// The retry attempt number (1-based).
        attempt: u32,
        /// How long until the task is re-inserted.
        delay: Duration,
    },
    /// Retries are exhausted; the task failed permanently and its
    /// outcome cascaded to dependents.
    FailedPermanently,
}

/// Full serializable dump of queue state for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Aggregate counters.
    pub statistics: QueueStatistics,
    /// Every known task, in creation order.
    pub tasks: Vec<Task>,
}

/// Heap entry: highest priority first, then lowest sequence (stable FIFO
/// among equal priorities). `epoch` invalidates entries that outlived a
/// status transition.
struct ReadyEntry {
    priority: Priority,
    seq: u64,
    epoch: u64,
    id: Uuid,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyEntry {}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<Uuid, Task>,
    ready: BinaryHeap<ReadyEntry>,
    dependents: HashMap<Uuid, Vec<Uuid>>,
    remaining: HashMap<Uuid, HashSet<Uuid>>,
    /// Per-task count of insertions into the ready structure; doubles as
    /// the epoch guard against stale heap entries.
    ready_epochs: HashMap<Uuid, u64>,
    seq: u64,
    enqueued_total: u64,
}

/// Owns the full lifecycle of all tasks in a run: dependency ordering,
/// priority scheduling, retry with linear backoff, and failure cascade.
///
/// All state lives behind a single coordinating lock, so concurrent
/// completion/failure reports are serialized relative to each other even
/// though task execution is concurrent. Constructed and shared as
/// `Arc<TaskQueue>`; [`TaskQueue::mark_failed`] must run inside a Tokio
/// runtime (retry re-insertion is a spawned delayed task).
pub struct TaskQueue {
    state: Mutex<QueueState>,
    ready_notify: Notify,
}

impl TaskQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready_notify: Notify::new(),
        }
    }

    /// Registers a task.
    ///
    /// Fails fast with a validation error on an empty description or a
    /// duplicate id — such tasks never enter the queue. A task whose
    /// dependencies are all already satisfied (or absent) becomes `Ready`
    /// immediately; otherwise it is `Pending` until its dependencies
    /// reach `Completed` or `Skipped`.
    pub fn enqueue(&self, mut task: Task) -> MaestroResult<Uuid> {
        if task.description.trim().is_empty() {
            return Err(MaestroError::Validation(
                "task description must not be empty".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if state.tasks.contains_key(&task.id) {
            return Err(MaestroError::Validation(format!(
                "task {} is already enqueued",
                task.id
            )));
        }

        state.enqueued_total += 1;
        let id = task.id;

        let unsatisfied: HashSet<Uuid> = task
            .dependencies
            .iter()
            .copied()
            .filter(|dep| {
                !state
                    .tasks
                    .get(dep)
                    .is_some_and(Task::satisfies_dependents)
            })
            .collect();

        if unsatisfied.is_empty() {
            task.status = TaskStatus::Ready;
            state.tasks.insert(id, task);
            push_ready(&mut state, id);
            drop(state);
            self.ready_notify.notify_one();
        } else {
            for dep in &unsatisfied {
                state.dependents.entry(*dep).or_default().push(id);
            }
            task.status = TaskStatus::Pending;
            state.remaining.insert(id, unsatisfied);
            state.tasks.insert(id, task);
        }

        Ok(id)
    }

    /// Pops the highest-priority ready task, transitioning it to
    /// `Running` and stamping `started_at`.
    ///
    /// Waits up to `timeout` for a task to become ready, waking as soon
    /// as one does. Returns `None` on timeout — a normal outcome.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock();
                while let Some(entry) = state.ready.pop() {
                    let current = state.ready_epochs.get(&entry.id).copied().unwrap_or(0);
                    if entry.epoch != current {
                        continue;
                    }
                    let Some(task) = state.tasks.get_mut(&entry.id) else {
                        continue;
                    };
                    if task.status != TaskStatus::Ready {
                        continue;
                    }
                    task.status = TaskStatus::Running;
                    task.started_at = Some(Utc::now());
                    let snapshot = task.clone();
                    if !state.ready.is_empty() {
                        // wake the next waiter for the remaining entries
                        self.ready_notify.notify_one();
                    }
                    return Some(snapshot);
                }
            }
            if tokio::time::timeout_at(deadline, self.ready_notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Reports successful completion of a running task, storing its
    /// result and unblocking dependents whose dependencies are now all
    /// satisfied.
    ///
    /// Returns false when the task is unknown or not `Running`.
    pub fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> bool {
        let mut state = self.state.lock();
        let Some(task) = state.tasks.get_mut(&id) else {
            return false;
        };
        if task.status != TaskStatus::Running {
            return false;
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = Some(result);
        tracing::debug!(task_id = %id, "task completed");

        let promoted = satisfy_dependents(&mut state, id);
        drop(state);
        if promoted > 0 {
            self.ready_notify.notify_one();
        }
        true
    }

    /// Reports a failed attempt of a running task.
    ///
    /// With retries left the task re-enters the ready structure after a
    /// linear-backoff delay (`retry_delay * retry_count`), without ever
    /// blocking the queue. With retries exhausted the task fails
    /// permanently and the outcome cascades: blocking dependents are
    /// recursively failed with an error naming the upstream task,
    /// non-blocking dependents are skipped (and a skip satisfies their
    /// own dependents).
    ///
    /// Returns `None` when the task is unknown or not `Running`.
    pub fn mark_failed(self: &Arc<Self>, id: Uuid, reason: &str) -> Option<FailureAction> {
        let mut state = self.state.lock();
        let Some(task) = state.tasks.get_mut(&id) else {
            return None;
        };
        if task.status != TaskStatus::Running {
            return None;
        }
        task.error = Some(reason.to_string());

        if task.retry_count < task.max_retries {
            task.retry_count += 1;
            let attempt = task.retry_count;
            let delay = task.retry_delay * attempt;
            task.status = TaskStatus::Ready;
            task.started_at = None;
            drop(state);

            tracing::warn!(task_id = %id, attempt, ?delay, reason, "task failed, retrying");
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.reinsert_after_retry(id);
            });
            Some(FailureAction::Retry { attempt, delay })
        } else {
            let reason = reason.to_string();
            task.status = TaskStatus::Failed {
                reason: reason.clone(),
            };
            task.completed_at = Some(Utc::now());
            tracing::warn!(task_id = %id, reason, "task failed permanently");

            cascade_failure(&mut state, id, &reason);
            drop(state);
            // skips may have made dependents ready
            self.ready_notify.notify_one();
            Some(FailureAction::FailedPermanently)
        }
    }

    fn reinsert_after_retry(&self, id: Uuid) {
        let mut state = self.state.lock();
        let still_ready = state
            .tasks
            .get(&id)
            .is_some_and(|task| task.status == TaskStatus::Ready);
        if still_ready {
            push_ready(&mut state, id);
            drop(state);
            self.ready_notify.notify_one();
        }
    }

    /// Cancels a task that has not started running.
    ///
    /// Legal only from `Pending` or `Ready`; returns false otherwise.
    pub fn cancel_task(&self, id: Uuid) -> bool {
        let mut state = self.state.lock();
        let cancellable = matches!(
            state.tasks.get(&id).map(|task| &task.status),
            Some(TaskStatus::Pending | TaskStatus::Ready)
        );
        if !cancellable {
            return false;
        }
        state.remaining.remove(&id);
        if let Some(task) = state.tasks.get_mut(&id) {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
        }
        true
    }

    /// Cancels every `Pending`/`Ready` task (run abort); running tasks
    /// are left to finish. Returns the number cancelled.
    pub fn cancel_remaining(&self) -> usize {
        let ids: Vec<Uuid> = {
            let state = self.state.lock();
            state
                .tasks
                .values()
                .filter(|task| {
                    matches!(task.status, TaskStatus::Pending | TaskStatus::Ready)
                })
                .map(|task| task.id)
                .collect()
        };
        ids.into_iter().filter(|id| self.cancel_task(*id)).count()
    }

    /// A task by id.
    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.state.lock().tasks.get(&id).cloned()
    }

    /// Tasks eligible for dequeue, in creation order.
    pub fn get_ready_tasks(&self) -> Vec<Task> {
        self.tasks_where(|status| *status == TaskStatus::Ready)
    }

    /// Tasks waiting on dependencies, in creation order.
    pub fn get_pending_tasks(&self) -> Vec<Task> {
        self.tasks_where(|status| *status == TaskStatus::Pending)
    }

    /// Tasks currently executing, in creation order.
    pub fn get_running_tasks(&self) -> Vec<Task> {
        self.tasks_where(|status| *status == TaskStatus::Running)
    }

    /// Tasks that completed successfully, in creation order.
    pub fn get_completed_tasks(&self) -> Vec<Task> {
        self.tasks_where(|status| *status == TaskStatus::Completed)
    }

    /// Tasks that failed permanently, in creation order.
    pub fn get_failed_tasks(&self) -> Vec<Task> {
        self.tasks_where(|status| matches!(status, TaskStatus::Failed { .. }))
    }

    fn tasks_where(&self, predicate: impl Fn(&TaskStatus) -> bool) -> Vec<Task> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| predicate(&task.status))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        tasks
    }

    /// Aggregate counters, including the success rate
    /// (`completed / enqueued_total`).
    pub fn get_statistics(&self) -> QueueStatistics {
        let state = self.state.lock();
        let mut stats = QueueStatistics {
            total_tasks: state.tasks.len(),
            enqueued_total: state.enqueued_total,
            ..QueueStatistics::default()
        };
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Ready => stats.ready += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed { .. } => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::Skipped => stats.skipped += 1,
            }
        }
        if state.enqueued_total > 0 {
            stats.success_rate = stats.completed as f64 / state.enqueued_total as f64;
        }
        stats
    }

    /// Full dump of queue state for observability.
    pub fn get_status(&self) -> QueueSnapshot {
        let statistics = self.get_statistics();
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        QueueSnapshot { statistics, tasks }
    }

    /// True when nothing is pending, ready, or running.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.tasks.values().any(|task| {
            matches!(
                task.status,
                TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Running
            )
        })
    }

    /// Number of times a task has been inserted into the ready structure
    /// (1 + its retries, for a task that became ready).
    pub fn ready_insertions(&self, id: Uuid) -> u64 {
        self.state.lock().ready_epochs.get(&id).copied().unwrap_or(0)
    }

    /// Checks for cycles in the dependency graph.
    pub fn has_cycle(&self) -> bool {
        let state = self.state.lock();
        let mut visited = HashMap::new();
        for &id in state.tasks.keys() {
            if dfs_cycle(&state, id, &mut visited) {
                return true;
            }
        }
        false
    }

    /// Resets all internal state.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = QueueState::default();
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn push_ready(state: &mut QueueState, id: Uuid) {
    let Some(task) = state.tasks.get(&id) else {
        return;
    };
    let priority = task.priority;
    state.seq += 1;
    let seq = state.seq;
    let epoch = state.ready_epochs.entry(id).or_insert(0);
    *epoch += 1;
    let epoch = *epoch;
    state.ready.push(ReadyEntry {
        priority,
        seq,
        epoch,
        id,
    });
}

/// Removes `id` from its dependents' remaining-dependency sets and
/// promotes dependents with none left from `Pending` to `Ready`.
/// Each readiness transition fires exactly once per dependency-terminal
/// event. Returns the number promoted.
fn satisfy_dependents(state: &mut QueueState, id: Uuid) -> usize {
    let mut promoted = 0;
    let dependents = state.dependents.get(&id).cloned().unwrap_or_default();
    for dep_id in dependents {
        let now_ready = state.remaining.get_mut(&dep_id).is_some_and(|deps| {
            deps.remove(&id);
            deps.is_empty()
        });
        if !now_ready {
            continue;
        }
        state.remaining.remove(&dep_id);
        let promotable = state
            .tasks
            .get(&dep_id)
            .is_some_and(|task| task.status == TaskStatus::Pending);
        if promotable {
            if let Some(task) = state.tasks.get_mut(&dep_id) {
                task.status = TaskStatus::Ready;
            }
            push_ready(state, dep_id);
            promoted += 1;
        }
    }
    promoted
}

/// Propagates a permanent failure to dependents: blocking dependents
/// fail recursively with an error naming the upstream task, non-blocking
/// dependents are skipped, and a skip satisfies their own dependents.
fn cascade_failure(state: &mut QueueState, failed_id: Uuid, reason: &str) {
    let dependents = state.dependents.get(&failed_id).cloned().unwrap_or_default();
    for dep_id in dependents {
        let Some((blocking, actionable)) = state.tasks.get(&dep_id).map(|task| {
            (
                task.blocking,
                matches!(task.status, TaskStatus::Pending | TaskStatus::Ready),
            )
        }) else {
            continue;
        };
        if !actionable {
            continue;
        }
        state.remaining.remove(&dep_id);
        if blocking {
            let cascade_reason = format!("dependency {failed_id} failed: {reason}");
            if let Some(task) = state.tasks.get_mut(&dep_id) {
                task.status = TaskStatus::Failed {
                    reason: cascade_reason.clone(),
                };
                task.error = Some(cascade_reason.clone());
                task.completed_at = Some(Utc::now());
            }
            cascade_failure(state, dep_id, &cascade_reason);
        } else {
            if let Some(task) = state.tasks.get_mut(&dep_id) {
                task.status = TaskStatus::Skipped;
                task.completed_at = Some(Utc::now());
            }
            satisfy_dependents(state, dep_id);
        }
    }
}

fn dfs_cycle(state: &QueueState, id: Uuid, visited: &mut HashMap<Uuid, u8>) -> bool {
    match visited.get(&id) {
        Some(1) => return true,  // back edge = cycle
        Some(2) => return false, // already processed
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(task) = state.tasks.get(&id) {
        for dep in &task.dependencies {
            if dfs_cycle(state, *dep, visited) {
                return true;
            }
        }
    }
    visited.insert(id, 2);
    false
}
