//! Audit trail and run statistics.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::context::ExecutionLog;
use crate::error::{RecorderError, StoreError};
use crate::store::ExecutionLogStore;

/// Aggregates over a chain's runs within a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatistics {
    pub chain_id: String,
    pub total_executions: usize,
    /// Runs with zero errors over total runs. Zero when there were no runs.
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub avg_rules_executed: f64,
}

pub struct Recorder {
    logs: Arc<dyn ExecutionLogStore>,
    timeout: Duration,
}

impl Recorder {
    pub fn new(logs: Arc<dyn ExecutionLogStore>, timeout: Duration) -> Self {
        Self { logs, timeout }
    }

    /// Append one log, giving up after the configured write bound.
    pub async fn record(&self, log: &ExecutionLog) -> Result<(), RecorderError> {
        match tokio::time::timeout(self.timeout, self.logs.append(log)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RecorderError::Timeout {
                timeout: self.timeout,
            }),
        }
    }

    /// Statistics over logs started within `[now - window, now]`.
    pub async fn statistics(
        &self,
        chain_id: &str,
        window: Duration,
    ) -> Result<ChainStatistics, StoreError> {
        let (from, to) = window_bounds(window);
        let logs = self.logs.query(chain_id, from, to).await?;
        Ok(summarize(chain_id, &logs))
    }

    /// Raw run history within `[now - window, now]`, oldest first.
    pub async fn history(
        &self,
        chain_id: &str,
        window: Duration,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        let (from, to) = window_bounds(window);
        self.logs.query(chain_id, from, to).await
    }
}

fn window_bounds(window: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let to = Utc::now();
    let span = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    let from = to.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);
    (from, to)
}

pub fn summarize(chain_id: &str, logs: &[ExecutionLog]) -> ChainStatistics {
    let total = logs.len();
    if total == 0 {
        return ChainStatistics {
            chain_id: chain_id.to_string(),
            total_executions: 0,
            success_rate: 0.0,
            avg_execution_time_ms: 0.0,
            avg_rules_executed: 0.0,
        };
    }

    let succeeded = logs.iter().filter(|l| l.errors.is_empty()).count();
    let time: u64 = logs.iter().map(ExecutionLog::execution_time_ms).sum();
    let rules: usize = logs.iter().map(|l| l.metrics.rules_executed).sum();
    let n = total as f64;

    ChainStatistics {
        chain_id: chain_id.to_string(),
        total_executions: total,
        success_rate: succeeded as f64 / n,
        avg_execution_time_ms: time as f64 / n,
        avg_rules_executed: rules as f64 / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;

    use crate::engine::context::{ExecutionMetrics, RunState};
    use crate::store::MemoryLogStore;

    fn log(errors: usize, time_ms: u64, rules: usize) -> ExecutionLog {
        ExecutionLog {
            execution_id: Uuid::new_v4(),
            chain_id: "vip".into(),
            chain_version: 1,
            state: if errors == 0 {
                RunState::Completed
            } else {
                RunState::Failed
            },
            success: errors == 0,
            input_event: json!({}),
            results: Vec::new(),
            errors: vec!["rule r1 failed: x".to_string(); errors],
            metrics: ExecutionMetrics {
                rules_executed: rules,
                total_time_ms: time_ms,
                ..Default::default()
            },
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    struct Stalled;

    #[async_trait]
    impl ExecutionLogStore for Stalled {
        async fn append(&self, _log: &ExecutionLog) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        async fn query(
            &self,
            _chain_id: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<ExecutionLog>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn summarize_averages() {
        let stats = summarize("vip", &[log(0, 10, 2), log(1, 30, 4), log(0, 20, 3), log(0, 40, 3)]);
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.success_rate, 0.75);
        assert_eq!(stats.avg_execution_time_ms, 25.0);
        assert_eq!(stats.avg_rules_executed, 3.0);
    }

    #[test]
    fn summarize_empty_window() {
        let stats = summarize("vip", &[]);
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn record_then_statistics() {
        let recorder = Recorder::new(Arc::new(MemoryLogStore::new()), Duration::from_secs(1));
        recorder.record(&log(0, 10, 1)).await.unwrap();
        recorder.record(&log(2, 30, 1)).await.unwrap();

        let stats = recorder
            .statistics("vip", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.success_rate, 0.5);

        let other = recorder
            .statistics("other", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(other.total_executions, 0);
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let recorder = Recorder::new(Arc::new(Stalled), Duration::from_millis(50));
        let err = recorder.record(&log(0, 1, 1)).await.unwrap_err();
        assert!(matches!(err, RecorderError::Timeout { .. }));
    }
}
