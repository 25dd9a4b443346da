//! Core definition types: rules, chains, compositions.
//!
//! Definitions are long-lived and owned by the stores. The engine only reads
//! them; a changed definition is a new record with a bumped `version`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_version() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

// ── Descriptors ─────────────────────────────────────────────────────

/// Opaque condition handed to a condition evaluator, resolved by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDescriptor {
    /// Registered condition type, e.g. `subject_contains`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Comparison operand.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Optional operator (`contains`, `equals`, `matches`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Dotted event path for field-based conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ConditionDescriptor {
    pub fn new(kind: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
            operator: None,
            field: None,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Opaque action handed to an action executor, resolved by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Registered action type, e.g. `escalate_to_manager`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ActionDescriptor {
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// An atomic business rule: one condition, one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub condition: ConditionDescriptor,
    pub action: ActionDescriptor,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        condition: ConditionDescriptor,
        action: ActionDescriptor,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            condition,
            action,
            priority: 0,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ── Chain ───────────────────────────────────────────────────────────

/// How a chain runs its rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Conditional,
    /// Any mode name the engine does not know. Rejected by the validator.
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Conditional => "conditional",
            Self::Unsupported => "unsupported",
        };
        write!(f, "{s}")
    }
}

/// Retry policy for rules whose evaluator or executor errored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first failure.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Gate evaluated before a rule in conditional mode, against the run so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    /// An earlier rule in this run executed successfully.
    RuleSucceeded { rule_id: String },
    /// A context key (merged rule output, else event field) equals `value`.
    ContextEquals {
        key: String,
        value: serde_json::Value,
    },
    /// At least `count` results have been produced so far.
    MinResults { count: usize },
}

/// An ordered pipeline of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleChain {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub rule_ids: Vec<String>,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub stop_on_failure: bool,
    /// Whole-run deadline. `None` means the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Conditional mode only; index `i` gates `rule_ids[i]`.
    #[serde(default)]
    pub conditions: Vec<Option<StepCondition>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RuleChain {
    pub fn new<I, S>(id: impl Into<String>, execution_mode: ExecutionMode, rule_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: default_version(),
            rule_ids: rule_ids.into_iter().map(Into::into).collect(),
            execution_mode,
            stop_on_failure: false,
            max_execution_time_ms: None,
            retry: RetryConfig::default(),
            conditions: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time_ms = Some(limit.as_millis() as u64);
        self
    }

    pub fn with_retry(mut self, max_retries: u32, delay: Duration) -> Self {
        self.retry = RetryConfig {
            max_retries,
            delay_ms: delay.as_millis() as u64,
        };
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Option<StepCondition>>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Effective deadline for a run.
    pub fn max_execution_time(&self, default: Duration) -> Duration {
        self.max_execution_time_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    /// Gate for the rule at `index`, if any.
    pub fn condition_at(&self, index: usize) -> Option<&StepCondition> {
        self.conditions.get(index).and_then(Option::as_ref)
    }
}

// ── Composition ─────────────────────────────────────────────────────

/// How composition conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
    #[serde(other)]
    Unsupported,
}

impl Logic {
    /// Combine individual outcomes. `Unsupported` never triggers.
    pub fn combine(&self, results: &[bool]) -> bool {
        match self {
            Self::And => !results.is_empty() && results.iter().all(|r| *r),
            Self::Or => results.iter().any(|r| *r),
            Self::Unsupported => false,
        }
    }
}

/// A flat set of conditions combined by AND/OR, mapped to actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleComposition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub conditions: Vec<ConditionDescriptor>,
    pub logic: Logic,
    pub actions: Vec<ActionDescriptor>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl RuleComposition {
    pub fn new(
        id: impl Into<String>,
        logic: Logic,
        conditions: Vec<ConditionDescriptor>,
        actions: Vec<ActionDescriptor>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: default_version(),
            conditions,
            logic,
            actions,
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_defaults_from_json() {
        let chain: RuleChain = serde_json::from_value(serde_json::json!({
            "id": "vip",
            "rule_ids": ["r1", "r2"],
            "execution_mode": "sequential"
        }))
        .unwrap();

        assert_eq!(chain.version, 1);
        assert!(!chain.stop_on_failure);
        assert_eq!(chain.retry.max_retries, 0);
        assert_eq!(
            chain.max_execution_time(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        assert!(chain.condition_at(0).is_none());
    }

    #[test]
    fn unknown_mode_parses_as_unsupported() {
        let chain: RuleChain = serde_json::from_value(serde_json::json!({
            "id": "odd",
            "rule_ids": ["r1"],
            "execution_mode": "round_robin"
        }))
        .unwrap();
        assert_eq!(chain.execution_mode, ExecutionMode::Unsupported);
    }

    #[test]
    fn step_conditions_are_tagged() {
        let cond: StepCondition = serde_json::from_value(serde_json::json!({
            "type": "rule_succeeded",
            "rule_id": "r1"
        }))
        .unwrap();
        assert_eq!(
            cond,
            StepCondition::RuleSucceeded {
                rule_id: "r1".into()
            }
        );

        let chain = RuleChain::new("c", ExecutionMode::Conditional, ["a", "b"])
            .with_conditions(vec![None, Some(StepCondition::MinResults { count: 1 })]);
        assert!(chain.condition_at(0).is_none());
        assert!(chain.condition_at(1).is_some());
        assert!(chain.condition_at(5).is_none());
    }

    #[test]
    fn logic_parses_both_cases() {
        let upper: Logic = serde_json::from_str("\"AND\"").unwrap();
        let lower: Logic = serde_json::from_str("\"or\"").unwrap();
        let other: Logic = serde_json::from_str("\"XOR\"").unwrap();
        assert_eq!(upper, Logic::And);
        assert_eq!(lower, Logic::Or);
        assert_eq!(other, Logic::Unsupported);
    }

    #[test]
    fn logic_combine() {
        assert!(Logic::And.combine(&[true, true]));
        assert!(!Logic::And.combine(&[true, false]));
        assert!(!Logic::And.combine(&[]));
        assert!(Logic::Or.combine(&[false, true]));
        assert!(!Logic::Or.combine(&[false, false]));
        assert!(!Logic::Unsupported.combine(&[true]));
    }
}
