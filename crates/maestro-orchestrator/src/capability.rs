use crate::context::ExecutionContext;
use crate::types::{AgentRole, Task};
use async_trait::async_trait;
use maestro_core::MaestroResult;
use std::collections::HashMap;
use std::sync::Arc;

/// An external, pluggable unit of work invoked by the orchestrator.
///
/// Implementations wrap whatever actually does the work (an LLM call, a
/// tool invocation, a local function) and are free to read and write the
/// shared [`ExecutionContext`]. A returned `Err` is captured as the
/// task's failure and subjected to the queue's retry policy; it never
/// aborts the run by itself.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Executes one task against the shared run context.
    async fn execute(
        &self,
        task: &Task,
        context: &ExecutionContext,
    ) -> MaestroResult<serde_json::Value>;
}

/// Maps each [`AgentRole`] to its typed handler.
///
/// Resolved once at orchestrator construction; a role with no binding at
/// execution time becomes a capability failure on that task, not a panic.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<AgentRole, Arc<dyn AgentCapability>>,
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for a role.
    pub fn register(&mut self, role: AgentRole, capability: Arc<dyn AgentCapability>) {
        self.handlers.insert(role, capability);
    }

    /// Builder-style [`CapabilityRegistry::register`].
    pub fn with_capability(mut self, role: AgentRole, capability: Arc<dyn AgentCapability>) -> Self {
        self.register(role, capability);
        self
    }

    /// The handler bound to `role`, if any.
    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn AgentCapability>> {
        self.handlers.get(&role).cloned()
    }

    /// Roles with a registered handler.
    pub fn roles(&self) -> Vec<AgentRole> {
        self.handlers.keys().copied().collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoCapability;

    #[async_trait]
    impl AgentCapability for EchoCapability {
        async fn execute(
            &self,
            task: &Task,
            _context: &ExecutionContext,
        ) -> MaestroResult<serde_json::Value> {
            Ok(json!({ "echo": task.description }))
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = CapabilityRegistry::new()
            .with_capability(AgentRole::Engineer, Arc::new(EchoCapability));
        assert_eq!(registry.len(), 1);

        let capability = registry.get(AgentRole::Engineer).unwrap();
        let task = Task::new("Implement the parser", AgentRole::Engineer);
        let context = ExecutionContext::new("u", "s", "req");
        let result = capability.execute(&task, &context).await.unwrap();
        assert_eq!(result["echo"], "Implement the parser");
    }

    #[test]
    fn test_missing_role_is_none() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get(AgentRole::Tester).is_none());
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = CapabilityRegistry::new();
        registry.register(AgentRole::Tester, Arc::new(EchoCapability));
        registry.register(AgentRole::Tester, Arc::new(EchoCapability));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.roles(), vec![AgentRole::Tester]);
    }
}
