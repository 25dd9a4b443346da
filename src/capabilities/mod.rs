//! Pluggable condition and action capabilities.
//!
//! The engine never interprets a condition or action itself. Each descriptor
//! is resolved by its `type` name against a registry, so deployments can add
//! their own kinds next to the built-ins and unknown kinds are rejected at
//! validation time instead of silently evaluating to false.

pub mod action;
pub mod builtin;
pub mod condition;

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use action::{ActionExecutor, ActionOutcome, ActionRegistry};
pub use condition::{ConditionEvaluator, ConditionRegistry};

/// Everything a capability may observe about the run it is part of.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Run this call belongs to.
    pub execution_id: Uuid,
    /// Chain or composition id.
    pub source_id: String,
    /// Rule being executed, when inside a chain.
    pub rule_id: Option<String>,
    /// Inbound event payload.
    pub event: Arc<Value>,
    /// Values merged from earlier rule results in this run.
    pub variables: Map<String, Value>,
    /// Fires when the run deadline passes.
    pub cancel: CancellationToken,
}

impl RuntimeContext {
    pub fn new(execution_id: Uuid, source_id: impl Into<String>, event: Arc<Value>) -> Self {
        Self {
            execution_id,
            source_id: source_id.into(),
            rule_id: None,
            event,
            variables: Map::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn for_rule(&self, rule_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.rule_id = Some(rule_id.to_string());
        ctx
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve `key` against merged variables first, then the event payload.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.variables.get(key) {
            return Some(value);
        }
        let mut parts = key.splitn(2, '.');
        if let (Some(head), Some(rest)) = (parts.next(), parts.next()) {
            if let Some(value) = self.variables.get(head).and_then(|v| lookup_path(v, rest)) {
                return Some(value);
            }
        }
        lookup_path(&self.event, key)
    }
}

/// Follow a dotted path (`headers.x-priority`, `to.0`) into a JSON value.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let event = json!({"headers": {"x-priority": "1"}, "to": ["a@x.com", "b@x.com"]});
        assert_eq!(lookup_path(&event, "headers.x-priority"), Some(&json!("1")));
        assert_eq!(lookup_path(&event, "to.1"), Some(&json!("b@x.com")));
        assert_eq!(lookup_path(&event, "to.9"), None);
        assert_eq!(lookup_path(&event, "missing.key"), None);
    }

    #[test]
    fn lookup_prefers_variables_over_event() {
        let event = Arc::new(json!({"priority": "low", "sender": "a@x.com"}));
        let mut ctx = RuntimeContext::new(Uuid::new_v4(), "chain", event);
        ctx.variables.insert("priority".into(), json!("high"));
        ctx.variables
            .insert("r1".into(), json!({"output": {"team": "billing"}}));

        assert_eq!(ctx.lookup("priority"), Some(&json!("high")));
        assert_eq!(ctx.lookup("sender"), Some(&json!("a@x.com")));
        assert_eq!(ctx.lookup("r1.output.team"), Some(&json!("billing")));
        assert_eq!(ctx.lookup("nope"), None);
    }

    #[test]
    fn for_rule_shares_cancellation() {
        let ctx = RuntimeContext::new(Uuid::new_v4(), "chain", Arc::new(json!({})));
        let rule_ctx = ctx.for_rule("r1");
        ctx.cancel.cancel();
        assert!(rule_ctx.is_cancelled());
        assert_eq!(rule_ctx.rule_id.as_deref(), Some("r1"));
    }
}
