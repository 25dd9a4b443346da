//! Built-in actions. Real side effects (escalation, notification delivery)
//! are registered by the deployment.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::capabilities::{ActionExecutor, ActionOutcome, RuntimeContext};
use crate::error::CapabilityError;
use crate::rules::model::ActionDescriptor;

/// Writes `params.message` to the log.
pub struct LogAction;

#[async_trait]
impl ActionExecutor for LogAction {
    fn kind(&self) -> &str {
        "log"
    }

    async fn execute(
        &self,
        action: &ActionDescriptor,
        ctx: &RuntimeContext,
    ) -> Result<ActionOutcome, CapabilityError> {
        let message = action
            .params
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("rule matched");
        info!(
            source = %ctx.source_id,
            rule = ctx.rule_id.as_deref().unwrap_or("-"),
            execution = %ctx.execution_id,
            "{}", message
        );
        Ok(ActionOutcome::executed(json!({ "logged": message })))
    }
}

/// Returns its params as the outcome detail, which merges into the run
/// context so later conditional steps can branch on it.
pub struct AnnotateAction;

#[async_trait]
impl ActionExecutor for AnnotateAction {
    fn kind(&self) -> &str {
        "annotate"
    }

    fn check(&self, action: &ActionDescriptor) -> Result<(), CapabilityError> {
        if action.params.is_object() {
            Ok(())
        } else {
            Err(CapabilityError::InvalidDescriptor {
                kind: action.kind.clone(),
                reason: "params must be an object".to_string(),
            })
        }
    }

    async fn execute(
        &self,
        action: &ActionDescriptor,
        _ctx: &RuntimeContext,
    ) -> Result<ActionOutcome, CapabilityError> {
        Ok(ActionOutcome::executed(action.params.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_requires_object_params() {
        assert!(
            AnnotateAction
                .check(&ActionDescriptor::new("annotate", json!("x")))
                .is_err()
        );
        assert!(
            AnnotateAction
                .check(&ActionDescriptor::new("annotate", json!({"k": 1})))
                .is_ok()
        );
    }
}
