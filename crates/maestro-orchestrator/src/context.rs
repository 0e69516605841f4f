use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One entry in the append-only audit timeline of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEvent {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The agent the event is attributed to.
    pub agent: String,
    /// What happened (e.g. `architecture_set`, `task_failed`).
    pub event_type: String,
    /// Event payload.
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ContextState {
    research_data: serde_json::Value,
    architecture: Option<String>,
    code_base: HashMap<String, String>,
    test_results: Option<String>,
    documentation: Option<String>,
    artifacts: HashMap<String, serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

/// Shared, per-run mutable state passed to agents during one
/// orchestration run.
///
/// Artifacts are partitioned by owning agent as a convention (one agent
/// owns `architecture`, another owns `code_base`, ...); every write is
/// attributed to the writing agent in the event timeline. The timeline
/// itself is append-only and guarded for concurrent appends.
pub struct ExecutionContext {
    /// Unique id of this orchestration run.
    pub execution_id: Uuid,
    /// The requesting user.
    pub user_id: String,
    /// The conversation session the run belongs to.
    pub session_id: String,
    /// The original user request.
    pub user_request: String,
    state: RwLock<ContextState>,
    events: Mutex<Vec<ContextEvent>>,
}

impl ExecutionContext {
    /// Creates a fresh context with a new execution id.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        user_request: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            user_request: user_request.into(),
            state: RwLock::new(ContextState::default()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Appends an event to the run timeline, attributed to `agent`.
    pub fn record_event(&self, agent: &str, event_type: &str, data: serde_json::Value) {
        self.events.lock().push(ContextEvent {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            event_type: event_type.to_string(),
            data,
        });
    }

    /// Stores the architecture artifact.
    pub fn set_architecture(&self, agent: &str, content: impl Into<String>) {
        self.state.write().architecture = Some(content.into());
        self.record_event(agent, "architecture_set", serde_json::Value::Null);
    }

    /// Adds or replaces one file in the shared code base.
    pub fn add_code_file(&self, agent: &str, name: impl Into<String>, content: impl Into<String>) {
        let name = name.into();
        self.state.write().code_base.insert(name.clone(), content.into());
        self.record_event(agent, "code_file_added", serde_json::json!({ "file": name }));
    }

    /// Stores the test-results artifact.
    pub fn set_test_results(&self, agent: &str, content: impl Into<String>) {
        self.state.write().test_results = Some(content.into());
        self.record_event(agent, "test_results_set", serde_json::Value::Null);
    }

    /// Stores the documentation artifact.
    pub fn set_documentation(&self, agent: &str, content: impl Into<String>) {
        self.state.write().documentation = Some(content.into());
        self.record_event(agent, "documentation_set", serde_json::Value::Null);
    }

    /// Stores the research payload gathered for the run.
    pub fn set_research_data(&self, agent: &str, data: serde_json::Value) {
        self.state.write().research_data = data;
        self.record_event(agent, "research_data_set", serde_json::Value::Null);
    }

    /// Stores a generic named artifact.
    pub fn set_artifact(&self, agent: &str, key: &str, value: serde_json::Value) {
        self.state.write().artifacts.insert(key.to_string(), value);
        self.record_event(agent, "artifact_set", serde_json::json!({ "key": key }));
    }

    /// Stores a free-form metadata entry (not attributed in the timeline).
    pub fn set_metadata(&self, key: &str, value: serde_json::Value) {
        self.state.write().metadata.insert(key.to_string(), value);
    }

    /// Current architecture artifact, if set.
    pub fn architecture(&self) -> Option<String> {
        self.state.read().architecture.clone()
    }

    /// Current shared code base (file name → content).
    pub fn code_base(&self) -> HashMap<String, String> {
        self.state.read().code_base.clone()
    }

    /// Current test-results artifact, if set.
    pub fn test_results(&self) -> Option<String> {
        self.state.read().test_results.clone()
    }

    /// Current documentation artifact, if set.
    pub fn documentation(&self) -> Option<String> {
        self.state.read().documentation.clone()
    }

    /// A generic artifact by key, if set.
    pub fn artifact(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().artifacts.get(key).cloned()
    }

    /// Copy of the run timeline, in append order.
    pub fn events(&self) -> Vec<ContextEvent> {
        self.events.lock().clone()
    }

    /// Plain serializable snapshot of the whole context.
    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.state.read().clone();
        ContextSnapshot {
            execution_id: self.execution_id,
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            user_request: self.user_request.clone(),
            research_data: state.research_data,
            architecture: state.architecture,
            code_base: state.code_base,
            test_results: state.test_results,
            documentation: state.documentation,
            artifacts: state.artifacts,
            metadata: state.metadata,
            events: self.events(),
        }
    }
}

/// Immutable, serializable copy of an [`ExecutionContext`], embedded in
/// the final orchestration result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Unique id of the orchestration run.
    pub execution_id: Uuid,
    /// The requesting user.
    pub user_id: String,
    /// The conversation session the run belongs to.
    pub session_id: String,
    /// The original user request.
    pub user_request: String,
    /// Research payload gathered for the run.
    pub research_data: serde_json::Value,
    /// Architecture artifact.
    pub architecture: Option<String>,
    /// Shared code base (file name → content).
    pub code_base: HashMap<String, String>,
    /// Test-results artifact.
    pub test_results: Option<String>,
    /// Documentation artifact.
    pub documentation: Option<String>,
    /// Generic named artifacts.
    pub artifacts: HashMap<String, serde_json::Value>,
    /// Free-form metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// The run timeline, in append order.
    pub events: Vec<ContextEvent>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_writes_are_attributed() {
        let context = ExecutionContext::new("user-1", "session-1", "Build a parser");
        context.set_architecture("architect", "three layers");
        context.add_code_file("engineer", "parser.rs", "fn parse() {}");

        let events = context.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].agent, "architect");
        assert_eq!(events[0].event_type, "architecture_set");
        assert_eq!(events[1].agent, "engineer");
        assert_eq!(events[1].data["file"], "parser.rs");
    }

    #[test]
    fn test_artifact_partition() {
        let context = ExecutionContext::new("u", "s", "req");
        context.set_test_results("tester", "12 passed");
        context.set_documentation("documenter", "# Usage");
        context.set_artifact("validator", "verdict", json!({"ok": true}));

        assert_eq!(context.test_results().as_deref(), Some("12 passed"));
        assert_eq!(context.documentation().as_deref(), Some("# Usage"));
        assert_eq!(context.artifact("verdict").unwrap()["ok"], true);
        assert!(context.artifact("missing").is_none());
    }

    #[test]
    fn test_concurrent_event_appends() {
        let context = std::sync::Arc::new(ExecutionContext::new("u", "s", "req"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let context = std::sync::Arc::clone(&context);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        context.record_event(&format!("agent-{i}"), "tick", json!(j));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(context.events().len(), 400);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let context = ExecutionContext::new("u", "s", "Build it");
        context.set_architecture("architect", "modular");
        context.add_code_file("engineer", "lib.rs", "pub fn run() {}");
        context.set_metadata("mode", json!("smart"));

        let snapshot = context.snapshot();
        assert_eq!(snapshot.user_request, "Build it");
        assert_eq!(snapshot.architecture.as_deref(), Some("modular"));
        assert_eq!(snapshot.code_base.len(), 1);
        assert_eq!(snapshot.events.len(), 2);

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: ContextSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.execution_id, context.execution_id);
        assert_eq!(parsed.metadata["mode"], "smart");
    }
}
