//! Action executor capability and its name-keyed registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::capabilities::RuntimeContext;
use crate::capabilities::builtin;
use crate::error::CapabilityError;
use crate::rules::model::ActionDescriptor;

/// What an action reported after running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether a side effect actually happened.
    pub executed: bool,
    /// Free-form detail. Object details are merged into the run context.
    #[serde(default)]
    pub detail: Value,
}

impl ActionOutcome {
    pub fn executed(detail: Value) -> Self {
        Self {
            executed: true,
            detail,
        }
    }

    pub fn skipped(detail: Value) -> Self {
        Self {
            executed: false,
            detail,
        }
    }
}

/// Performs the side effect behind an action descriptor.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Action type this executor handles, e.g. `escalate_to_manager`.
    fn kind(&self) -> &str;

    /// Reject malformed descriptors before a chain is accepted.
    fn check(&self, _action: &ActionDescriptor) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn execute(
        &self,
        action: &ActionDescriptor,
        ctx: &RuntimeContext,
    ) -> Result<ActionOutcome, CapabilityError>;
}

/// Registry of available action executors.
pub struct ActionRegistry {
    executors: RwLock<HashMap<String, Arc<dyn ActionExecutor>>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            executors: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in action types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for executor in builtin::actions() {
            registry.register_sync(executor);
        }
        registry
    }

    /// Register an executor, replacing any previous one of the same kind.
    pub async fn register(&self, executor: Arc<dyn ActionExecutor>) {
        let kind = executor.kind().to_string();
        self.executors.write().await.insert(kind.clone(), executor);
        tracing::debug!("Registered action type: {}", kind);
    }

    /// Register an executor (sync version for startup).
    pub fn register_sync(&self, executor: Arc<dyn ActionExecutor>) {
        let kind = executor.kind().to_string();
        if let Ok(mut executors) = self.executors.try_write() {
            executors.insert(kind.clone(), executor);
            tracing::debug!("Registered action type: {}", kind);
        }
    }

    pub async fn get(&self, kind: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.read().await.get(kind).cloned()
    }

    pub async fn has(&self, kind: &str) -> bool {
        self.executors.read().await.contains_key(kind)
    }

    /// All registered kinds, sorted.
    pub async fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.executors.read().await.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Resolve the descriptor's kind and let the executor vet it.
    pub async fn check(&self, action: &ActionDescriptor) -> Result<(), CapabilityError> {
        let executor = self
            .get(&action.kind)
            .await
            .ok_or_else(|| CapabilityError::UnknownAction {
                kind: action.kind.clone(),
            })?;
        executor.check(action)
    }

    /// Dispatch to the executor registered for `action.kind`.
    pub async fn execute(
        &self,
        action: &ActionDescriptor,
        ctx: &RuntimeContext,
    ) -> Result<ActionOutcome, CapabilityError> {
        let executor = self
            .get(&action.kind)
            .await
            .ok_or_else(|| CapabilityError::UnknownAction {
                kind: action.kind.clone(),
            })?;
        executor.execute(action, ctx).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> RuntimeContext {
        RuntimeContext::new(Uuid::new_v4(), "test", Arc::new(json!({})))
    }

    #[tokio::test]
    async fn builtin_annotate_returns_params() {
        let registry = ActionRegistry::with_builtins();
        let action = ActionDescriptor::new("annotate", json!({"team": "billing"}));
        let outcome = registry.execute(&action, &ctx()).await.unwrap();
        assert!(outcome.executed);
        assert_eq!(outcome.detail, json!({"team": "billing"}));
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let registry = ActionRegistry::with_builtins();
        let action = ActionDescriptor::new("page_oncall", json!({}));
        assert!(matches!(
            registry.execute(&action, &ctx()).await,
            Err(CapabilityError::UnknownAction { .. })
        ));
        assert!(!registry.has("page_oncall").await);
    }
}
