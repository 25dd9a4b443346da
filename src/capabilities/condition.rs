//! Condition evaluator capability and its name-keyed registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::capabilities::RuntimeContext;
use crate::capabilities::builtin;
use crate::error::CapabilityError;
use crate::rules::model::ConditionDescriptor;

/// Decides whether a condition holds for an inbound event.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// Condition type this evaluator handles, e.g. `subject_contains`.
    fn kind(&self) -> &str;

    /// Reject malformed descriptors before a chain is accepted.
    fn check(&self, _condition: &ConditionDescriptor) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn evaluate(
        &self,
        condition: &ConditionDescriptor,
        event: &Value,
        ctx: &RuntimeContext,
    ) -> Result<bool, CapabilityError>;
}

/// Registry of available condition evaluators.
pub struct ConditionRegistry {
    evaluators: RwLock<HashMap<String, Arc<dyn ConditionEvaluator>>>,
}

impl ConditionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            evaluators: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in condition types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for evaluator in builtin::conditions() {
            registry.register_sync(evaluator);
        }
        registry
    }

    /// Register an evaluator, replacing any previous one of the same kind.
    pub async fn register(&self, evaluator: Arc<dyn ConditionEvaluator>) {
        let kind = evaluator.kind().to_string();
        self.evaluators.write().await.insert(kind.clone(), evaluator);
        tracing::debug!("Registered condition type: {}", kind);
    }

    /// Register an evaluator (sync version for startup).
    pub fn register_sync(&self, evaluator: Arc<dyn ConditionEvaluator>) {
        let kind = evaluator.kind().to_string();
        if let Ok(mut evaluators) = self.evaluators.try_write() {
            evaluators.insert(kind.clone(), evaluator);
            tracing::debug!("Registered condition type: {}", kind);
        }
    }

    pub async fn get(&self, kind: &str) -> Option<Arc<dyn ConditionEvaluator>> {
        self.evaluators.read().await.get(kind).cloned()
    }

    pub async fn has(&self, kind: &str) -> bool {
        self.evaluators.read().await.contains_key(kind)
    }

    /// All registered kinds, sorted.
    pub async fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.evaluators.read().await.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Resolve the descriptor's kind and let the evaluator vet it.
    pub async fn check(&self, condition: &ConditionDescriptor) -> Result<(), CapabilityError> {
        let evaluator =
            self.get(&condition.kind)
                .await
                .ok_or_else(|| CapabilityError::UnknownCondition {
                    kind: condition.kind.clone(),
                })?;
        evaluator.check(condition)
    }

    /// Dispatch to the evaluator registered for `condition.kind`.
    pub async fn evaluate(
        &self,
        condition: &ConditionDescriptor,
        event: &Value,
        ctx: &RuntimeContext,
    ) -> Result<bool, CapabilityError> {
        let evaluator =
            self.get(&condition.kind)
                .await
                .ok_or_else(|| CapabilityError::UnknownCondition {
                    kind: condition.kind.clone(),
                })?;
        evaluator.evaluate(condition, event, ctx).await
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct Flagged;

    #[async_trait]
    impl ConditionEvaluator for Flagged {
        fn kind(&self) -> &str {
            "is_flagged"
        }

        async fn evaluate(
            &self,
            _condition: &ConditionDescriptor,
            event: &Value,
            _ctx: &RuntimeContext,
        ) -> Result<bool, CapabilityError> {
            Ok(event.get("flagged").and_then(Value::as_bool).unwrap_or(false))
        }
    }

    fn ctx() -> RuntimeContext {
        RuntimeContext::new(Uuid::new_v4(), "test", Arc::new(json!({})))
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let registry = ConditionRegistry::with_builtins();
        let kinds = registry.kinds().await;
        for kind in ["subject_contains", "from_email", "field_equals", "always"] {
            assert!(kinds.iter().any(|k| k == kind), "missing {kind}");
        }
    }

    #[tokio::test]
    async fn unknown_kind_is_an_error() {
        let registry = ConditionRegistry::with_builtins();
        let cond = ConditionDescriptor::new("sentiment_is", "angry");
        let err = registry.evaluate(&cond, &json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownCondition { .. }));
        assert!(registry.check(&cond).await.is_err());
    }

    #[tokio::test]
    async fn custom_evaluator_dispatch() {
        let registry = ConditionRegistry::new();
        registry.register(Arc::new(Flagged)).await;

        let cond = ConditionDescriptor::new("is_flagged", Value::Null);
        assert!(registry.has("is_flagged").await);
        assert!(
            registry
                .evaluate(&cond, &json!({"flagged": true}), &ctx())
                .await
                .unwrap()
        );
        assert!(!registry.evaluate(&cond, &json!({}), &ctx()).await.unwrap());
    }
}
