//! Chain execution: sequential, parallel, and conditional modes under a single
//! run deadline.
//!
//! Every rule runs as its own spawned task that shares the run's cancellation
//! token. When the deadline passes the token is cancelled and outstanding
//! handles are dropped, which detaches the tasks rather than aborting them.
//! A rule already inside its action call therefore finishes that call: at
//! most one more side effect per in-flight rule can land after the run has
//! been reported as timed out. Rules that have not yet reached their action
//! see the token and stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::capabilities::{ActionOutcome, ActionRegistry, ConditionRegistry, RuntimeContext};
use crate::engine::context::{ExecutionContext, ExecutionResult};
use crate::error::{ChainError, RuleError};
use crate::rules::model::{ExecutionMode, RetryConfig, RuleChain};
use crate::store::RuleStore;

// ── Single rule ─────────────────────────────────────────────────────

/// Loads, evaluates, and executes one rule. Cheap to clone into tasks.
#[derive(Clone)]
pub struct RuleRunner {
    rules: Arc<dyn RuleStore>,
    conditions: Arc<ConditionRegistry>,
    actions: Arc<ActionRegistry>,
}

impl RuleRunner {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        conditions: Arc<ConditionRegistry>,
        actions: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            rules,
            conditions,
            actions,
        }
    }

    /// Run a rule to a result, retrying evaluator and executor errors per
    /// `retry`. Never fails; every error becomes a failed result.
    pub async fn run(
        &self,
        rule_id: String,
        retry: RetryConfig,
        ctx: RuntimeContext,
    ) -> ExecutionResult {
        let executed_at = Utc::now();
        let started = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.attempt(&rule_id, &ctx).await {
                Ok(action) => {
                    debug!(
                        rule = %rule_id,
                        triggered = action.is_some(),
                        attempts,
                        "Rule finished"
                    );
                    return ExecutionResult::succeeded(
                        rule_id,
                        executed_at,
                        started.elapsed(),
                        attempts,
                        action,
                    );
                }
                Err(e @ RuleError::Execution { .. }) if attempts <= retry.max_retries => {
                    debug!(rule = %rule_id, attempt = attempts, error = %e, "Rule errored, retrying");
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {
                            let cancelled = RuleError::Cancelled { rule_id: rule_id.clone() };
                            return ExecutionResult::failed(rule_id, executed_at, started.elapsed(), attempts, &cancelled);
                        }
                        _ = tokio::time::sleep(retry.delay()) => {}
                    }
                }
                Err(e) => {
                    debug!(rule = %rule_id, error = %e, "Rule failed");
                    return ExecutionResult::failed(
                        rule_id,
                        executed_at,
                        started.elapsed(),
                        attempts,
                        &e,
                    );
                }
            }
        }
    }

    /// One attempt. `Ok(None)` means the condition did not hold.
    async fn attempt(
        &self,
        rule_id: &str,
        ctx: &RuntimeContext,
    ) -> Result<Option<ActionOutcome>, RuleError> {
        let cancelled = || RuleError::Cancelled {
            rule_id: rule_id.to_string(),
        };
        let execution = |reason: String| RuleError::Execution {
            rule_id: rule_id.to_string(),
            reason,
        };

        if ctx.is_cancelled() {
            return Err(cancelled());
        }

        let rule = self
            .rules
            .get_rule(rule_id)
            .await
            .map_err(|e| execution(e.to_string()))?
            .ok_or_else(|| RuleError::NotFound {
                rule_id: rule_id.to_string(),
            })?;
        if !rule.enabled {
            return Err(RuleError::Disabled {
                rule_id: rule_id.to_string(),
            });
        }

        let matched = self
            .conditions
            .evaluate(&rule.condition, &ctx.event, ctx)
            .await
            .map_err(|e| execution(e.to_string()))?;
        if !matched {
            return Ok(None);
        }

        if ctx.is_cancelled() {
            return Err(cancelled());
        }

        let outcome = self
            .actions
            .execute(&rule.action, ctx)
            .await
            .map_err(|e| execution(e.to_string()))?;
        Ok(Some(outcome))
    }
}

fn joined_result(rule_id: String, joined: Result<ExecutionResult, JoinError>) -> ExecutionResult {
    joined.unwrap_or_else(|e| {
        let err = RuleError::Execution {
            rule_id: rule_id.clone(),
            reason: format!("rule task panicked: {e}"),
        };
        ExecutionResult::failed(rule_id, Utc::now(), Duration::ZERO, 1, &err)
    })
}

// ── Chain ───────────────────────────────────────────────────────────

pub struct Coordinator {
    runner: RuleRunner,
    default_max_execution_time: Duration,
}

impl Coordinator {
    pub fn new(runner: RuleRunner, default_max_execution_time: Duration) -> Self {
        Self {
            runner,
            default_max_execution_time,
        }
    }

    /// Run `chain` against `event` to a terminal state.
    ///
    /// Only an unsupported mode is an `Err`; rule failures and timeouts are
    /// reported inside the returned context.
    pub async fn run(
        &self,
        chain: Arc<RuleChain>,
        event: Arc<Value>,
    ) -> Result<ExecutionContext, ChainError> {
        if chain.execution_mode == ExecutionMode::Unsupported {
            return Err(ChainError::UnsupportedMode {
                chain_id: chain.id.clone(),
            });
        }

        let limit = chain.max_execution_time(self.default_max_execution_time);
        let deadline = tokio::time::Instant::now() + limit;
        let mut ctx = ExecutionContext::new(&chain, event);
        debug!(
            chain = %chain.id,
            execution = %ctx.execution_id,
            mode = %chain.execution_mode,
            limit_ms = limit.as_millis() as u64,
            "Chain run started"
        );

        let timed_out = tokio::select! {
            timed_out = self.run_mode(&chain, &mut ctx, limit) => timed_out,
            _ = tokio::time::sleep_until(deadline) => true,
        };

        if timed_out {
            let err = ChainError::Timeout {
                chain_id: chain.id.clone(),
                limit,
            };
            warn!(
                chain = %chain.id,
                execution = %ctx.execution_id,
                completed = ctx.results.len(),
                "{}", err
            );
            ctx.finish(Some(err.to_string()));
        } else {
            ctx.finish(None);
        }

        info!(
            chain = %chain.id,
            execution = %ctx.execution_id,
            state = %ctx.state,
            rules_executed = ctx.metrics.rules_executed,
            rules_failed = ctx.metrics.rules_failed,
            elapsed_ms = ctx.metrics.total_time_ms,
            "Chain run finished"
        );
        Ok(ctx)
    }

    /// Returns true when the run stopped because the time limit passed.
    async fn run_mode(&self, chain: &RuleChain, ctx: &mut ExecutionContext, limit: Duration) -> bool {
        match chain.execution_mode {
            ExecutionMode::Parallel => {
                self.run_parallel(chain, ctx).await;
                false
            }
            ExecutionMode::Sequential | ExecutionMode::Conditional => {
                self.run_ordered(chain, ctx, limit).await
            }
            ExecutionMode::Unsupported => false,
        }
    }

    fn spawn_rule(
        &self,
        rule_id: &str,
        chain: &RuleChain,
        ctx: &ExecutionContext,
    ) -> JoinHandle<ExecutionResult> {
        let runner = self.runner.clone();
        let retry = chain.retry.clone();
        let rule_ctx = ctx.runtime_for(rule_id);
        let rule_id = rule_id.to_string();
        tokio::spawn(async move { runner.run(rule_id, retry, rule_ctx).await })
    }

    /// Sequential and conditional modes: one rule at a time, in order.
    async fn run_ordered(
        &self,
        chain: &RuleChain,
        ctx: &mut ExecutionContext,
        limit: Duration,
    ) -> bool {
        let gated = chain.execution_mode == ExecutionMode::Conditional;

        for (index, rule_id) in chain.rule_ids.iter().enumerate() {
            if ctx.elapsed() > limit {
                return true;
            }

            let open = !gated || chain.condition_at(index).is_none_or(|gate| ctx.allows(gate));
            if !open {
                ctx.record_skip(rule_id);
                continue;
            }

            ctx.mark_started();
            let joined = self.spawn_rule(rule_id, chain, ctx).await;
            let result = joined_result(rule_id.clone(), joined);
            let failed = !result.success;
            ctx.record(result);

            if failed && chain.stop_on_failure {
                debug!(
                    chain = %chain.id,
                    rule = %rule_id,
                    skipped = chain.rule_ids.len() - index - 1,
                    "Stopping chain on failure"
                );
                break;
            }
        }
        false
    }

    /// Parallel mode: every rule at once, results in completion order.
    async fn run_parallel(&self, chain: &RuleChain, ctx: &mut ExecutionContext) {
        ctx.mark_started();
        let mut pending: FuturesUnordered<_> = chain
            .rule_ids
            .iter()
            .map(|rule_id| {
                let id = rule_id.clone();
                self.spawn_rule(rule_id, chain, ctx)
                    .map(move |joined| (id, joined))
            })
            .collect();

        while let Some((rule_id, joined)) = pending.next().await {
            ctx.record(joined_result(rule_id, joined));
        }
    }
}
