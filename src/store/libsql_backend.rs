//! libSQL execution log store.
//!
//! Supports local file and in-memory databases. Structured fields (results,
//! errors, metrics, input event) are stored as JSON text; timestamps as
//! RFC 3339.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::context::{ExecutionLog, RunState};
use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::ExecutionLogStore;

/// Execution log store on a single reused libSQL connection.
pub struct LibSqlLogStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLogStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Execution log database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Serialization(format!("{what}: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Serialization(format!("{what}: {e}")))
}

fn row_to_log(row: &libsql::Row) -> Result<ExecutionLog, StoreError> {
    let col = |e: libsql::Error| StoreError::Query(format!("execution_logs row parse: {e}"));

    let execution_id: String = row.get(0).map_err(col)?;
    let state: String = row.get(3).map_err(col)?;
    let input_event: String = row.get(5).map_err(col)?;
    let results: String = row.get(6).map_err(col)?;
    let errors: String = row.get(7).map_err(col)?;
    let metrics: String = row.get(8).map_err(col)?;
    let started_at: String = row.get(9).map_err(col)?;
    let completed_at: String = row.get(10).map_err(col)?;

    Ok(ExecutionLog {
        execution_id: Uuid::parse_str(&execution_id)
            .map_err(|e| StoreError::Serialization(format!("execution_id: {e}")))?,
        chain_id: row.get(1).map_err(col)?,
        chain_version: row.get::<i64>(2).map_err(col)? as u32,
        state: state
            .parse::<RunState>()
            .map_err(StoreError::Serialization)?,
        success: row.get::<i64>(4).map_err(col)? != 0,
        input_event: from_json(&input_event, "input_event")?,
        results: from_json(&results, "results")?,
        errors: from_json(&errors, "errors")?,
        metrics: from_json(&metrics, "metrics")?,
        started_at: parse_datetime(&started_at),
        completed_at: parse_datetime(&completed_at),
    })
}

const LOG_COLUMNS: &str = "execution_id, chain_id, chain_version, state, success, input_event, results, errors, metrics, started_at, completed_at";

#[async_trait]
impl ExecutionLogStore for LibSqlLogStore {
    async fn append(&self, log: &ExecutionLog) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO execution_logs (execution_id, chain_id, chain_version, state, success, input_event, results, errors, metrics, execution_time_ms, rules_executed, started_at, completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    log.execution_id.to_string(),
                    log.chain_id.clone(),
                    log.chain_version as i64,
                    log.state.to_string(),
                    log.success as i64,
                    to_json(&log.input_event, "input_event")?,
                    to_json(&log.results, "results")?,
                    to_json(&log.errors, "errors")?,
                    to_json(&log.metrics, "metrics")?,
                    log.metrics.total_time_ms as i64,
                    log.metrics.rules_executed as i64,
                    timestamp(&log.started_at),
                    timestamp(&log.completed_at),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("append_execution_log: {e}")))?;

        debug!(execution = %log.execution_id, chain = %log.chain_id, "Execution log appended");
        Ok(())
    }

    async fn query(
        &self,
        chain_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM execution_logs WHERE chain_id = ?1 AND started_at >= ?2 AND started_at <= ?3 ORDER BY started_at ASC"
                ),
                params![chain_id, timestamp(&from), timestamp(&to)],
            )
            .await
            .map_err(|e| StoreError::Query(format!("query_execution_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("query_execution_logs: {e}")))?
        {
            logs.push(row_to_log(&row)?);
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    use crate::engine::context::ExecutionMetrics;

    fn log(chain_id: &str, started_at: DateTime<Utc>, success: bool) -> ExecutionLog {
        ExecutionLog {
            execution_id: Uuid::new_v4(),
            chain_id: chain_id.to_string(),
            chain_version: 2,
            state: if success {
                RunState::Completed
            } else {
                RunState::Failed
            },
            success,
            input_event: json!({"subject": "hello"}),
            results: Vec::new(),
            errors: if success {
                Vec::new()
            } else {
                vec!["rule r1 failed: boom".into()]
            },
            metrics: ExecutionMetrics {
                rules_executed: 3,
                total_time_ms: 40,
                ..Default::default()
            },
            started_at,
            completed_at: started_at,
        }
    }

    #[tokio::test]
    async fn append_and_query_round_trip() {
        let store = LibSqlLogStore::new_memory().await.unwrap();
        let now = Utc::now();
        let written = log("vip", now, false);
        store.append(&written).await.unwrap();

        let found = store
            .query(
                "vip",
                now - ChronoDuration::minutes(1),
                now + ChronoDuration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let read = &found[0];
        assert_eq!(read.execution_id, written.execution_id);
        assert_eq!(read.state, RunState::Failed);
        assert!(!read.success);
        assert_eq!(read.errors, written.errors);
        assert_eq!(read.metrics, written.metrics);
        assert_eq!(read.input_event, written.input_event);
    }

    #[tokio::test]
    async fn query_filters_by_chain_and_window() {
        let store = LibSqlLogStore::new_memory().await.unwrap();
        let now = Utc::now();
        store.append(&log("vip", now, true)).await.unwrap();
        store
            .append(&log("vip", now - ChronoDuration::days(3), true))
            .await
            .unwrap();
        store.append(&log("other", now, true)).await.unwrap();

        let found = store
            .query("vip", now - ChronoDuration::hours(24), now)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].chain_id, "vip");
    }

    #[tokio::test]
    async fn duplicate_execution_id_is_rejected() {
        let store = LibSqlLogStore::new_memory().await.unwrap();
        let entry = log("vip", Utc::now(), true);
        store.append(&entry).await.unwrap();
        assert!(store.append(&entry).await.is_err());
    }
}
