//! Error types for the triage rule engine.

use std::time::Duration;

/// Top-level error type for the engine.
///
/// Only chain-level failures surface through this type. Anything that goes
/// wrong after the first rule starts is reported inside the run result.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// A chain or composition failed structural or referential checks.
///
/// Carries every problem found, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Validation failed for {target}: {}", .errors.join("; "))]
pub struct ValidationError {
    /// What was validated, e.g. `chain escalate-vip`.
    pub target: String,
    pub errors: Vec<String>,
}

/// Per-rule failures. These never escape the coordinator; each one becomes a
/// failed `ExecutionResult`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleError {
    #[error("rule {rule_id} not found")]
    NotFound { rule_id: String },

    #[error("rule {rule_id} is disabled")]
    Disabled { rule_id: String },

    #[error("{reason}")]
    Execution { rule_id: String, reason: String },

    #[error("rule {rule_id} cancelled before completion")]
    Cancelled { rule_id: String },
}

/// Chain-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} is disabled")]
    Disabled { kind: &'static str, id: String },

    #[error("chain {chain_id} exceeded max execution time of {}ms", .limit.as_millis())]
    Timeout { chain_id: String, limit: Duration },

    #[error("chain {chain_id} has an unsupported execution mode")]
    UnsupportedMode { chain_id: String },
}

/// Errors raised by condition evaluators and action executors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CapabilityError {
    #[error("unknown condition type '{kind}'")]
    UnknownCondition { kind: String },

    #[error("unknown action type '{kind}'")]
    UnknownAction { kind: String },

    #[error("invalid {kind} descriptor: {reason}")]
    InvalidDescriptor { kind: String, reason: String },

    #[error("{kind} failed: {reason}")]
    Failed { kind: String, reason: String },
}

/// Persistence errors from any of the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Telemetry persistence failures. Logged, never turned into a run failure.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Failed to append execution log: {0}")]
    Store(#[from] StoreError),

    #[error("Execution log write exceeded {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
