//! Structural and referential checks for chains and compositions.
//!
//! Validation is exhaustive: every problem is collected, in a fixed order, so
//! validating an unchanged definition twice yields the same list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::{ActionRegistry, ConditionRegistry};
use crate::error::{StoreError, ValidationError};
use crate::rules::model::{ExecutionMode, Logic, Rule, RuleChain, RuleComposition, StepCondition};
use crate::store::RuleStore;

/// Outcome of validating one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub target: String,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn new(target: String) -> Self {
        Self {
            target,
            errors: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                target: self.target,
                errors: self.errors,
            })
        }
    }
}

pub struct Validator {
    rules: Arc<dyn RuleStore>,
    conditions: Arc<ConditionRegistry>,
    actions: Arc<ActionRegistry>,
    min_execution_time: Duration,
}

impl Validator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        conditions: Arc<ConditionRegistry>,
        actions: Arc<ActionRegistry>,
        min_execution_time: Duration,
    ) -> Self {
        Self {
            rules,
            conditions,
            actions,
            min_execution_time,
        }
    }

    /// Check a chain against the rule store and capability registries.
    ///
    /// Only a failing rule store lookup is an `Err`; definition problems are
    /// reported in the returned report.
    pub async fn validate_chain(&self, chain: &RuleChain) -> Result<ValidationReport, StoreError> {
        let mut report = ValidationReport::new(format!("chain {}", chain.id));

        if chain.rule_ids.is_empty() {
            report
                .errors
                .push("chain must reference at least one rule".to_string());
        }

        let found: HashMap<String, Rule> = self
            .rules
            .get_rules_by_ids(&chain.rule_ids)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();

        let mut seen = HashSet::new();
        for id in &chain.rule_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match found.get(id) {
                None => report.errors.push(format!("rule {id} does not exist")),
                Some(rule) if !rule.enabled => {
                    report.errors.push(format!("rule {id} is disabled"))
                }
                Some(rule) => {
                    if let Err(e) = self.conditions.check(&rule.condition).await {
                        report.errors.push(format!("rule {id}: {e}"));
                    }
                    if let Err(e) = self.actions.check(&rule.action).await {
                        report.errors.push(format!("rule {id}: {e}"));
                    }
                }
            }
        }

        if chain.execution_mode == ExecutionMode::Unsupported {
            report
                .errors
                .push("execution mode must be one of sequential, parallel, conditional".to_string());
        }

        if let Some(ms) = chain.max_execution_time_ms {
            let floor = self.min_execution_time.as_millis() as u64;
            if ms < floor {
                report.errors.push(format!(
                    "max execution time must be at least {floor}ms, got {ms}ms"
                ));
            }
        }

        if chain.execution_mode == ExecutionMode::Conditional {
            check_step_conditions(chain, &mut report.errors);
        }

        Ok(report)
    }

    /// Check a composition's shape and that every condition and action type
    /// is registered.
    pub async fn validate_composition(&self, composition: &RuleComposition) -> ValidationReport {
        let mut report = ValidationReport::new(format!("composition {}", composition.id));

        if composition.conditions.is_empty() {
            report
                .errors
                .push("composition must have at least one condition".to_string());
        }
        if composition.actions.is_empty() {
            report
                .errors
                .push("composition must have at least one action".to_string());
        }
        if composition.logic == Logic::Unsupported {
            report.errors.push("logic must be AND or OR".to_string());
        }

        for (i, condition) in composition.conditions.iter().enumerate() {
            if let Err(e) = self.conditions.check(condition).await {
                report.errors.push(format!("condition {i}: {e}"));
            }
        }
        for (i, action) in composition.actions.iter().enumerate() {
            if let Err(e) = self.actions.check(action).await {
                report.errors.push(format!("action {i}: {e}"));
            }
        }

        report
    }
}

fn check_step_conditions(chain: &RuleChain, errors: &mut Vec<String>) {
    if chain.conditions.len() > chain.rule_ids.len() {
        errors.push(format!(
            "conditional mode has {} conditions for {} rules",
            chain.conditions.len(),
            chain.rule_ids.len()
        ));
    }

    for (i, condition) in chain.conditions.iter().enumerate() {
        if let Some(StepCondition::RuleSucceeded { rule_id }) = condition {
            let earlier = &chain.rule_ids[..i.min(chain.rule_ids.len())];
            if !earlier.contains(rule_id) {
                errors.push(format!(
                    "condition {i} references rule {rule_id}, which does not run before it"
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::MIN_EXECUTION_TIME;
    use crate::rules::model::{ActionDescriptor, ConditionDescriptor};
    use crate::store::MemoryRuleStore;

    fn rule(id: &str) -> Rule {
        Rule::new(
            id,
            ConditionDescriptor::new("subject_contains", "urgent"),
            ActionDescriptor::new("log", json!({"message": "hit"})),
        )
    }

    fn validator(rules: Vec<Rule>) -> Validator {
        Validator::new(
            Arc::new(MemoryRuleStore::with_rules(rules)),
            Arc::new(ConditionRegistry::with_builtins()),
            Arc::new(ActionRegistry::with_builtins()),
            MIN_EXECUTION_TIME,
        )
    }

    #[tokio::test]
    async fn valid_chain_passes() {
        let v = validator(vec![rule("r1"), rule("r2")]);
        let chain = RuleChain::new("c", ExecutionMode::Sequential, ["r1", "r2"])
            .with_max_execution_time(Duration::from_secs(5));
        let report = v.validate_chain(&chain).await.unwrap();
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn lists_every_problem() {
        let v = validator(vec![rule("r1"), rule("r2").disabled()]);
        let chain = RuleChain::new("c", ExecutionMode::Unsupported, ["r1", "r2", "r9", "r8"])
            .with_max_execution_time(Duration::from_millis(200));

        let report = v.validate_chain(&chain).await.unwrap();
        assert_eq!(
            report.errors,
            vec![
                "rule r2 is disabled",
                "rule r9 does not exist",
                "rule r8 does not exist",
                "execution mode must be one of sequential, parallel, conditional",
                "max execution time must be at least 1000ms, got 200ms",
            ]
        );

        let err = report.into_result().unwrap_err();
        assert_eq!(err.target, "chain c");
        assert_eq!(err.errors.len(), 5);
    }

    #[tokio::test]
    async fn empty_chain_is_rejected() {
        let v = validator(vec![]);
        let chain = RuleChain::new("c", ExecutionMode::Parallel, Vec::<String>::new());
        let report = v.validate_chain(&chain).await.unwrap();
        assert_eq!(report.errors, vec!["chain must reference at least one rule"]);
    }

    #[tokio::test]
    async fn unknown_capability_types_are_rejected() {
        let mut odd = rule("r1");
        odd.condition = ConditionDescriptor::new("sentiment_is", "angry");
        odd.action = ActionDescriptor::new("page_oncall", json!({}));
        let v = validator(vec![odd]);
        let chain = RuleChain::new("c", ExecutionMode::Sequential, ["r1"]);

        let report = v.validate_chain(&chain).await.unwrap();
        assert_eq!(
            report.errors,
            vec![
                "rule r1: unknown condition type 'sentiment_is'",
                "rule r1: unknown action type 'page_oncall'",
            ]
        );
    }

    #[tokio::test]
    async fn step_condition_checks() {
        let v = validator(vec![rule("r1"), rule("r2")]);
        let chain = RuleChain::new("c", ExecutionMode::Conditional, ["r1", "r2"]).with_conditions(
            vec![
                Some(StepCondition::RuleSucceeded {
                    rule_id: "r2".into(),
                }),
                Some(StepCondition::RuleSucceeded {
                    rule_id: "r1".into(),
                }),
                None,
            ],
        );

        let report = v.validate_chain(&chain).await.unwrap();
        assert_eq!(
            report.errors,
            vec![
                "conditional mode has 3 conditions for 2 rules",
                "condition 0 references rule r2, which does not run before it",
            ]
        );
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let v = validator(vec![rule("r1").disabled()]);
        let chain = RuleChain::new("c", ExecutionMode::Sequential, ["r1", "missing"]);
        let first = v.validate_chain(&chain).await.unwrap();
        let second = v.validate_chain(&chain).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.errors.len(), 2);
    }

    #[tokio::test]
    async fn composition_checks() {
        let v = validator(vec![]);
        let empty = RuleComposition::new("comp", Logic::Unsupported, vec![], vec![]);
        let report = v.validate_composition(&empty).await;
        assert_eq!(
            report.errors,
            vec![
                "composition must have at least one condition",
                "composition must have at least one action",
                "logic must be AND or OR",
            ]
        );

        let bad_type = RuleComposition::new(
            "comp",
            Logic::Or,
            vec![
                ConditionDescriptor::new("subject_contains", "urgent"),
                ConditionDescriptor::new("sentiment_is", "angry"),
            ],
            vec![ActionDescriptor::new("log", json!({}))],
        );
        let report = v.validate_composition(&bad_type).await;
        assert_eq!(
            report.errors,
            vec!["condition 1: unknown condition type 'sentiment_is'"]
        );
    }
}
