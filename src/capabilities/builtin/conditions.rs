//! Built-in message conditions.
//!
//! Events are JSON objects shaped like an inbound message: `sender`,
//! `subject`, `content` (with `from` / `body` accepted as aliases). Text
//! comparisons are case-insensitive except for `matches`, which uses the
//! regex exactly as written.

use std::str::FromStr;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::capabilities::{ConditionEvaluator, RuntimeContext, lookup_path};
use crate::error::CapabilityError;
use crate::rules::model::ConditionDescriptor;

/// Text comparison applied by string conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Contains,
    NotContains,
    Equals,
    StartsWith,
    EndsWith,
    Matches,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(Self::Contains),
            "not_contains" => Ok(Self::NotContains),
            "equals" => Ok(Self::Equals),
            "starts_with" => Ok(Self::StartsWith),
            "ends_with" => Ok(Self::EndsWith),
            "matches" => Ok(Self::Matches),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

impl Operator {
    pub fn apply(&self, haystack: &str, needle: &str) -> Result<bool, String> {
        let lower = haystack.to_lowercase();
        let wanted = needle.to_lowercase();
        Ok(match self {
            Self::Contains => lower.contains(&wanted),
            Self::NotContains => !lower.contains(&wanted),
            Self::Equals => lower == wanted,
            Self::StartsWith => lower.starts_with(&wanted),
            Self::EndsWith => lower.ends_with(&wanted),
            Self::Matches => Regex::new(needle)
                .map_err(|e| format!("invalid regex: {e}"))?
                .is_match(haystack),
        })
    }
}

fn invalid(condition: &ConditionDescriptor, reason: impl Into<String>) -> CapabilityError {
    CapabilityError::InvalidDescriptor {
        kind: condition.kind.clone(),
        reason: reason.into(),
    }
}

fn operator_or(
    condition: &ConditionDescriptor,
    default: Operator,
) -> Result<Operator, CapabilityError> {
    match condition.operator.as_deref() {
        Some(op) => op.parse().map_err(|e: String| invalid(condition, e)),
        None => Ok(default),
    }
}

fn string_value<'a>(condition: &'a ConditionDescriptor) -> Result<&'a str, CapabilityError> {
    condition
        .value
        .as_str()
        .ok_or_else(|| invalid(condition, "value must be a string"))
}

fn check_text(condition: &ConditionDescriptor, default: Operator) -> Result<(), CapabilityError> {
    let operator = operator_or(condition, default)?;
    let value = string_value(condition)?;
    if operator == Operator::Matches {
        Regex::new(value).map_err(|e| invalid(condition, format!("invalid regex: {e}")))?;
    }
    Ok(())
}

/// First string found at any of `fields`, or empty.
fn first_text<'a>(event: &'a Value, fields: &[&str]) -> &'a str {
    fields
        .iter()
        .find_map(|f| event.get(*f).and_then(Value::as_str))
        .unwrap_or("")
}

/// `"Alice <alice@x.com>"` → `alice@x.com`.
fn bare_address(sender: &str) -> &str {
    match (sender.find('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => sender[start + 1..end].trim(),
        _ => sender.trim(),
    }
}

// ── Text conditions ─────────────────────────────────────────────────

/// Compare one message field against a string.
pub struct TextCondition {
    kind: &'static str,
    fields: &'static [&'static str],
    default_operator: Operator,
    address: bool,
}

impl TextCondition {
    pub fn subject_contains() -> Self {
        Self {
            kind: "subject_contains",
            fields: &["subject"],
            default_operator: Operator::Contains,
            address: false,
        }
    }

    pub fn body_contains() -> Self {
        Self {
            kind: "body_contains",
            fields: &["content", "body"],
            default_operator: Operator::Contains,
            address: false,
        }
    }

    pub fn from_email() -> Self {
        Self {
            kind: "from_email",
            fields: &["sender", "from"],
            default_operator: Operator::Equals,
            address: true,
        }
    }
}

#[async_trait]
impl ConditionEvaluator for TextCondition {
    fn kind(&self) -> &str {
        self.kind
    }

    fn check(&self, condition: &ConditionDescriptor) -> Result<(), CapabilityError> {
        check_text(condition, self.default_operator)
    }

    async fn evaluate(
        &self,
        condition: &ConditionDescriptor,
        event: &Value,
        _ctx: &RuntimeContext,
    ) -> Result<bool, CapabilityError> {
        let operator = operator_or(condition, self.default_operator)?;
        let needle = string_value(condition)?;
        let mut haystack = first_text(event, self.fields);
        if self.address {
            haystack = bare_address(haystack);
        }
        operator
            .apply(haystack, needle)
            .map_err(|e| invalid(condition, e))
    }
}

/// Sender's domain equals `value` (leading `@` optional).
pub struct FromDomainCondition;

#[async_trait]
impl ConditionEvaluator for FromDomainCondition {
    fn kind(&self) -> &str {
        "from_domain"
    }

    fn check(&self, condition: &ConditionDescriptor) -> Result<(), CapabilityError> {
        string_value(condition).map(|_| ())
    }

    async fn evaluate(
        &self,
        condition: &ConditionDescriptor,
        event: &Value,
        _ctx: &RuntimeContext,
    ) -> Result<bool, CapabilityError> {
        let wanted = string_value(condition)?.trim_start_matches('@');
        let sender = bare_address(first_text(event, &["sender", "from"]));
        Ok(sender
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.eq_ignore_ascii_case(wanted)))
    }
}

// ── Field conditions ────────────────────────────────────────────────

fn required_field(condition: &ConditionDescriptor) -> Result<&str, CapabilityError> {
    condition
        .field
        .as_deref()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| invalid(condition, "field is required"))
}

/// Event value at `field` is JSON-equal to `value`.
pub struct FieldEqualsCondition;

#[async_trait]
impl ConditionEvaluator for FieldEqualsCondition {
    fn kind(&self) -> &str {
        "field_equals"
    }

    fn check(&self, condition: &ConditionDescriptor) -> Result<(), CapabilityError> {
        required_field(condition)?;
        match condition.operator.as_deref() {
            None | Some("equals") | Some("not_equals") => Ok(()),
            Some(other) => Err(invalid(condition, format!("unsupported operator '{other}'"))),
        }
    }

    async fn evaluate(
        &self,
        condition: &ConditionDescriptor,
        event: &Value,
        _ctx: &RuntimeContext,
    ) -> Result<bool, CapabilityError> {
        let field = required_field(condition)?;
        let equal = lookup_path(event, field) == Some(&condition.value);
        Ok(match condition.operator.as_deref() {
            Some("not_equals") => !equal,
            _ => equal,
        })
    }
}

/// String value at `field` matches the regex in `value`.
pub struct FieldMatchesCondition;

#[async_trait]
impl ConditionEvaluator for FieldMatchesCondition {
    fn kind(&self) -> &str {
        "field_matches"
    }

    fn check(&self, condition: &ConditionDescriptor) -> Result<(), CapabilityError> {
        required_field(condition)?;
        let pattern = string_value(condition)?;
        Regex::new(pattern).map_err(|e| invalid(condition, format!("invalid regex: {e}")))?;
        Ok(())
    }

    async fn evaluate(
        &self,
        condition: &ConditionDescriptor,
        event: &Value,
        _ctx: &RuntimeContext,
    ) -> Result<bool, CapabilityError> {
        let field = required_field(condition)?;
        let pattern = string_value(condition)?;
        let text = match lookup_path(event, field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => return Ok(false),
            Some(other) => other.to_string(),
        };
        Operator::Matches
            .apply(&text, pattern)
            .map_err(|e| invalid(condition, e))
    }
}

/// Always true. Used for rules that should fire unconditionally.
pub struct AlwaysCondition;

#[async_trait]
impl ConditionEvaluator for AlwaysCondition {
    fn kind(&self) -> &str {
        "always"
    }

    async fn evaluate(
        &self,
        _condition: &ConditionDescriptor,
        _event: &Value,
        _ctx: &RuntimeContext,
    ) -> Result<bool, CapabilityError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn ctx() -> RuntimeContext {
        RuntimeContext::new(Uuid::new_v4(), "test", Arc::new(json!({})))
    }

    fn email() -> Value {
        json!({
            "sender": "Boss Person <boss@acme.com>",
            "subject": "URGENT: server down",
            "content": "Please call me back",
            "headers": {"x-priority": 1}
        })
    }

    async fn eval(evaluator: &dyn ConditionEvaluator, cond: ConditionDescriptor) -> bool {
        evaluator.evaluate(&cond, &email(), &ctx()).await.unwrap()
    }

    #[tokio::test]
    async fn subject_contains_ignores_case() {
        let c = TextCondition::subject_contains();
        assert!(eval(&c, ConditionDescriptor::new("subject_contains", "urgent")).await);
        assert!(!eval(&c, ConditionDescriptor::new("subject_contains", "invoice")).await);
        assert!(
            eval(
                &c,
                ConditionDescriptor::new("subject_contains", "invoice").with_operator("not_contains")
            )
            .await
        );
    }

    #[tokio::test]
    async fn from_email_strips_display_name() {
        let c = TextCondition::from_email();
        assert!(eval(&c, ConditionDescriptor::new("from_email", "BOSS@acme.com")).await);
        assert!(!eval(&c, ConditionDescriptor::new("from_email", "x@y.com")).await);
    }

    #[tokio::test]
    async fn from_domain_matches() {
        let c = FromDomainCondition;
        assert!(eval(&c, ConditionDescriptor::new("from_domain", "@acme.com")).await);
        assert!(!eval(&c, ConditionDescriptor::new("from_domain", "other.org")).await);
    }

    #[tokio::test]
    async fn field_conditions() {
        let eq = FieldEqualsCondition;
        let cond = ConditionDescriptor::new("field_equals", 1).on_field("headers.x-priority");
        assert!(eval(&eq, cond.clone()).await);
        assert!(!eval(&eq, cond.with_operator("not_equals")).await);

        let m = FieldMatchesCondition;
        let cond = ConditionDescriptor::new("field_matches", r"^URGENT:").on_field("subject");
        assert!(eval(&m, cond).await);
        let missing = ConditionDescriptor::new("field_matches", ".*").on_field("cc");
        assert!(!eval(&m, missing).await);
    }

    #[test]
    fn check_rejects_bad_descriptors() {
        let text = TextCondition::subject_contains();
        assert!(text.check(&ConditionDescriptor::new("subject_contains", 5)).is_err());
        assert!(
            text.check(&ConditionDescriptor::new("subject_contains", "x").with_operator("fuzzy"))
                .is_err()
        );
        assert!(
            text.check(&ConditionDescriptor::new("subject_contains", "(").with_operator("matches"))
                .is_err()
        );
        assert!(
            FieldEqualsCondition
                .check(&ConditionDescriptor::new("field_equals", "x"))
                .is_err()
        );
        assert!(
            FieldMatchesCondition
                .check(&ConditionDescriptor::new("field_matches", "[").on_field("subject"))
                .is_err()
        );
    }

    #[test]
    fn operators() {
        assert!(Operator::StartsWith.apply("Hello", "he").unwrap());
        assert!(Operator::EndsWith.apply("Hello", "LO").unwrap());
        assert!(Operator::Matches.apply("abc123", r"\d+").unwrap());
        assert!(Operator::Matches.apply("abc", "(").is_err());
    }
}
