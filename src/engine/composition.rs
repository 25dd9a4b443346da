//! AND/OR evaluation of rule compositions.
//!
//! Evaluation is total: every condition runs even under OR, so the
//! per-condition outcomes are always available for audit.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::capabilities::{ActionOutcome, ActionRegistry, ConditionRegistry, RuntimeContext};
use crate::rules::model::{ActionDescriptor, RuleComposition};

/// Result of evaluating one composition against one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionOutcome {
    pub composition_id: String,
    pub version: u32,
    pub triggered: bool,
    /// One entry per condition, in definition order.
    pub condition_results: Vec<bool>,
    /// The composition's actions when triggered, otherwise empty.
    pub actions_to_run: Vec<ActionDescriptor>,
    /// Condition evaluator errors. An errored condition counts as false.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// One executed composition action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRunResult {
    pub action: ActionDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evaluation plus the results of running `actions_to_run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionRun {
    pub outcome: CompositionOutcome,
    pub actions: Vec<ActionRunResult>,
}

impl CompositionRun {
    pub fn success(&self) -> bool {
        self.outcome.errors.is_empty() && self.actions.iter().all(|a| a.error.is_none())
    }
}

pub struct CompositionEvaluator {
    conditions: Arc<ConditionRegistry>,
    actions: Arc<ActionRegistry>,
}

impl CompositionEvaluator {
    pub fn new(conditions: Arc<ConditionRegistry>, actions: Arc<ActionRegistry>) -> Self {
        Self {
            conditions,
            actions,
        }
    }

    pub async fn evaluate(
        &self,
        composition: &RuleComposition,
        event: Arc<Value>,
    ) -> CompositionOutcome {
        let ctx = RuntimeContext::new(Uuid::new_v4(), composition.id.clone(), event);

        let evaluations = composition
            .conditions
            .iter()
            .map(|condition| self.conditions.evaluate(condition, &ctx.event, &ctx));
        let outcomes = join_all(evaluations).await;

        let mut errors = Vec::new();
        let condition_results: Vec<bool> = outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| {
                outcome.unwrap_or_else(|e| {
                    errors.push(format!("condition {i}: {e}"));
                    false
                })
            })
            .collect();

        let triggered = composition.logic.combine(&condition_results);
        debug!(
            composition = %composition.id,
            logic = ?composition.logic,
            triggered,
            results = ?condition_results,
            "Composition evaluated"
        );

        CompositionOutcome {
            composition_id: composition.id.clone(),
            version: composition.version,
            triggered,
            condition_results,
            actions_to_run: if triggered {
                composition.actions.clone()
            } else {
                Vec::new()
            },
            errors,
        }
    }

    /// Evaluate, then execute `actions_to_run` in order. Action failures are
    /// reported per action and do not stop the remaining actions.
    pub async fn run(&self, composition: &RuleComposition, event: Arc<Value>) -> CompositionRun {
        let outcome = self.evaluate(composition, event.clone()).await;
        let ctx = RuntimeContext::new(Uuid::new_v4(), composition.id.clone(), event);

        let mut actions = Vec::with_capacity(outcome.actions_to_run.len());
        for action in &outcome.actions_to_run {
            let result = match self.actions.execute(action, &ctx).await {
                Ok(done) => ActionRunResult {
                    action: action.clone(),
                    outcome: Some(done),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(composition = %composition.id, action = %action.kind, error = %e, "Composition action failed");
                    ActionRunResult {
                        action: action.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            actions.push(result);
        }

        CompositionRun { outcome, actions }
    }
}
