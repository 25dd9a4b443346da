//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Lowest `max_execution_time` a chain may declare.
pub const MIN_EXECUTION_TIME: Duration = Duration::from_millis(1000);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline applied when a chain definition omits one.
    pub default_max_execution_time: Duration,
    /// Validation floor for a chain's `max_execution_time`.
    pub min_execution_time: Duration,
    /// Upper bound on a single execution-log write.
    pub recorder_timeout: Duration,
    /// Window used by `statistics` when the caller does not pass one.
    pub statistics_window: Duration,
    /// Path of the libSQL execution-log database.
    pub db_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_execution_time: Duration::from_secs(30),
            min_execution_time: MIN_EXECUTION_TIME,
            recorder_timeout: Duration::from_secs(2),
            statistics_window: Duration::from_secs(24 * 3600), // 1 day
            db_path: PathBuf::from("./data/triage-engine.db"),
        }
    }
}

impl EngineConfig {
    /// Build from `TRIAGE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_max_execution_time = env_millis("TRIAGE_DEFAULT_MAX_EXECUTION_MS")?
            .unwrap_or(defaults.default_max_execution_time);
        if default_max_execution_time < defaults.min_execution_time {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_DEFAULT_MAX_EXECUTION_MS".to_string(),
                message: format!(
                    "must be at least {}ms",
                    defaults.min_execution_time.as_millis()
                ),
            });
        }

        let recorder_timeout =
            env_millis("TRIAGE_RECORDER_TIMEOUT_MS")?.unwrap_or(defaults.recorder_timeout);

        let statistics_window = env_u64("TRIAGE_STATS_WINDOW_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.statistics_window);

        let db_path = std::env::var("TRIAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        Ok(Self {
            default_max_execution_time,
            min_execution_time: defaults.min_execution_time,
            recorder_timeout,
            statistics_window,
            db_path,
        })
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?} is not a positive integer: {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_u64(key)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_respect_floor() {
        let config = EngineConfig::default();
        assert!(config.default_max_execution_time >= config.min_execution_time);
        assert_eq!(config.min_execution_time, Duration::from_millis(1000));
    }

    #[test]
    fn env_u64_missing_is_none() {
        assert!(env_u64("TRIAGE_TEST_DEFINITELY_UNSET").unwrap().is_none());
    }
}
