//! Built-in condition and action types for email triage.

pub mod actions;
pub mod conditions;

use std::sync::Arc;

use crate::capabilities::{ActionExecutor, ConditionEvaluator};

/// Every built-in condition evaluator.
pub fn conditions() -> Vec<Arc<dyn ConditionEvaluator>> {
    vec![
        Arc::new(conditions::TextCondition::subject_contains()),
        Arc::new(conditions::TextCondition::body_contains()),
        Arc::new(conditions::TextCondition::from_email()),
        Arc::new(conditions::FromDomainCondition),
        Arc::new(conditions::FieldEqualsCondition),
        Arc::new(conditions::FieldMatchesCondition),
        Arc::new(conditions::AlwaysCondition),
    ]
}

/// Every built-in action executor.
pub fn actions() -> Vec<Arc<dyn ActionExecutor>> {
    vec![
        Arc::new(actions::LogAction),
        Arc::new(actions::AnnotateAction),
    ]
}
