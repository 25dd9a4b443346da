//! Per-run execution state.
//!
//! An `ExecutionContext` is created for exactly one chain run, owned by the
//! task driving that run, and discarded once its log has been written.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capabilities::{ActionOutcome, RuntimeContext};
use crate::error::RuleError;
use crate::rules::model::{ExecutionMode, RuleChain, StepCondition};

// ── Run state machine ───────────────────────────────────────────────

/// Lifecycle of a chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl RunState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Completed) | (Running, Failed) | (Running, TimedOut)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(format!("unknown run state: {other}")),
        }
    }
}

// ── Per-rule result ─────────────────────────────────────────────────

/// Outcome of one rule within a run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rule_id: String,
    /// No error occurred.
    pub success: bool,
    /// The rule's condition held and its action ran.
    pub triggered: bool,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    /// Attempts made, including retries.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionOutcome>,
}

impl ExecutionResult {
    pub fn succeeded(
        rule_id: impl Into<String>,
        executed_at: DateTime<Utc>,
        elapsed: Duration,
        attempts: u32,
        action: Option<ActionOutcome>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            success: true,
            triggered: action.is_some(),
            executed_at,
            execution_time_ms: elapsed.as_millis() as u64,
            attempts,
            error: None,
            action,
        }
    }

    pub fn failed(
        rule_id: impl Into<String>,
        executed_at: DateTime<Utc>,
        elapsed: Duration,
        attempts: u32,
        error: &RuleError,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            success: false,
            triggered: false,
            executed_at,
            execution_time_ms: elapsed.as_millis() as u64,
            attempts,
            error: Some(error.to_string()),
            action: None,
        }
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Rules that produced a result.
    pub rules_executed: usize,
    pub rules_succeeded: usize,
    pub rules_failed: usize,
    /// Rules whose condition held.
    pub rules_triggered: usize,
    /// Rules passed over by a conditional gate.
    pub rules_skipped: usize,
    pub total_time_ms: u64,
}

// ── Execution context ───────────────────────────────────────────────

/// Mutable state of a single chain run.
#[derive(Debug)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub chain_id: String,
    pub chain_version: u32,
    pub mode: ExecutionMode,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Vec<ExecutionResult>,
    pub errors: Vec<String>,
    pub metrics: ExecutionMetrics,
    runtime: RuntimeContext,
    clock: Instant,
}

impl ExecutionContext {
    pub fn new(chain: &RuleChain, event: Arc<Value>) -> Self {
        let execution_id = Uuid::new_v4();
        Self {
            execution_id,
            chain_id: chain.id.clone(),
            chain_version: chain.version,
            mode: chain.execution_mode,
            state: RunState::Pending,
            started_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            errors: Vec::new(),
            metrics: ExecutionMetrics::default(),
            runtime: RuntimeContext::new(execution_id, chain.id.clone(), event),
            clock: Instant::now(),
        }
    }

    /// Move to `target`, ignoring transitions the state machine forbids.
    pub fn transition_to(&mut self, target: RunState) -> bool {
        if !self.state.can_transition_to(target) {
            tracing::warn!(
                execution = %self.execution_id,
                from = %self.state,
                to = %target,
                "Ignoring invalid run state transition"
            );
            return false;
        }
        self.state = target;
        true
    }

    /// Enter `Running` when the first rule starts. Later calls do nothing.
    pub fn mark_started(&mut self) {
        if self.state == RunState::Pending {
            self.transition_to(RunState::Running);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.runtime.cancel
    }

    /// Snapshot handed to capability calls for `rule_id`.
    pub fn runtime_for(&self, rule_id: &str) -> RuntimeContext {
        self.runtime.for_rule(rule_id)
    }

    /// Append a rule result and fold it into counters and context variables.
    pub fn record(&mut self, result: ExecutionResult) {
        self.metrics.rules_executed += 1;
        if result.success {
            self.metrics.rules_succeeded += 1;
        } else {
            self.metrics.rules_failed += 1;
            let reason = result.error.as_deref().unwrap_or("unknown error");
            self.errors
                .push(format!("rule {} failed: {}", result.rule_id, reason));
        }
        if result.triggered {
            self.metrics.rules_triggered += 1;
        }

        let detail = result
            .action
            .as_ref()
            .map(|a| a.detail.clone())
            .unwrap_or(Value::Null);
        if let Value::Object(fields) = &detail {
            for (key, value) in fields {
                self.runtime.variables.insert(key.clone(), value.clone());
            }
        }
        self.runtime.variables.insert(
            result.rule_id.clone(),
            serde_json::json!({
                "success": result.success,
                "triggered": result.triggered,
                "output": detail,
            }),
        );

        self.results.push(result);
    }

    pub fn record_skip(&mut self, rule_id: &str) {
        tracing::debug!(execution = %self.execution_id, rule = %rule_id, "Step gate closed, skipping rule");
        self.metrics.rules_skipped += 1;
    }

    /// Evaluate a conditional-mode gate against the run so far.
    pub fn allows(&self, condition: &StepCondition) -> bool {
        match condition {
            StepCondition::RuleSucceeded { rule_id } => self
                .results
                .iter()
                .any(|r| r.rule_id == *rule_id && r.success),
            StepCondition::ContextEquals { key, value } => self.runtime.lookup(key) == Some(value),
            StepCondition::MinResults { count } => self.results.len() >= *count,
        }
    }

    /// Close the run: `TimedOut` when a timeout message is given, otherwise
    /// `Completed` or `Failed` depending on whether any error was recorded.
    /// A run in which no rule started passes through `Running` first.
    pub fn finish(&mut self, timeout: Option<String>) {
        let target = match timeout {
            Some(message) => {
                self.errors.push(message);
                RunState::TimedOut
            }
            None if self.errors.is_empty() => RunState::Completed,
            None => RunState::Failed,
        };
        self.mark_started();
        self.transition_to(target);
        self.runtime.cancel.cancel();
        self.completed_at = Some(Utc::now());
        self.metrics.total_time_ms = self.elapsed().as_millis() as u64;
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Durable projection written by the recorder.
    pub fn to_log(&self) -> ExecutionLog {
        ExecutionLog {
            execution_id: self.execution_id,
            chain_id: self.chain_id.clone(),
            chain_version: self.chain_version,
            state: self.state,
            success: self.success(),
            input_event: self.runtime.event.as_ref().clone(),
            results: self.results.clone(),
            errors: self.errors.clone(),
            metrics: self.metrics.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at.unwrap_or_else(Utc::now),
        }
    }

    /// Caller-facing result.
    pub fn into_execution(self) -> ChainExecution {
        let success = self.success();
        ChainExecution {
            execution_id: self.execution_id,
            chain_id: self.chain_id,
            state: self.state,
            success,
            results: self.results,
            errors: self.errors,
            metrics: self.metrics,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Structured result returned for every chain run.
///
/// `success` is exactly `errors.is_empty()`; inspect `errors` for partial
/// failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExecution {
    pub execution_id: Uuid,
    pub chain_id: String,
    pub state: RunState,
    pub success: bool,
    pub results: Vec<ExecutionResult>,
    pub errors: Vec<String>,
    pub metrics: ExecutionMetrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ChainExecution {
    pub fn result_for(&self, rule_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.rule_id == rule_id)
    }
}

/// Persisted, write-once record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub execution_id: Uuid,
    pub chain_id: String,
    pub chain_version: u32,
    pub state: RunState,
    pub success: bool,
    pub input_event: Value,
    pub results: Vec<ExecutionResult>,
    pub errors: Vec<String>,
    pub metrics: ExecutionMetrics,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn execution_time_ms(&self) -> u64 {
        self.metrics.total_time_ms
    }
}
