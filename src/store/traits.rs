//! Storage seams for definitions and execution logs.
//!
//! Rules, chains, and compositions are owned by the definition stores; the
//! engine only reads them. Execution logs are append-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::engine::context::ExecutionLog;
use crate::error::StoreError;
use crate::rules::model::{Rule, RuleChain, RuleComposition};

/// Read access to atomic rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Fetch the rules that exist among `ids`. Missing ids are simply absent
    /// from the result; order is not guaranteed.
    async fn get_rules_by_ids(&self, ids: &[String]) -> Result<Vec<Rule>, StoreError>;

    /// Fetch a single rule.
    async fn get_rule(&self, id: &str) -> Result<Option<Rule>, StoreError>;
}

/// Chain and composition definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn get_chain(&self, id: &str) -> Result<Option<RuleChain>, StoreError>;

    /// Persist a chain and return its id.
    async fn create_chain(&self, chain: &RuleChain) -> Result<String, StoreError>;

    async fn get_composition(&self, id: &str) -> Result<Option<RuleComposition>, StoreError>;

    /// Persist a composition and return its id.
    async fn create_composition(&self, composition: &RuleComposition)
    -> Result<String, StoreError>;

    /// All stored compositions, enabled or not.
    async fn list_compositions(&self) -> Result<Vec<RuleComposition>, StoreError>;
}

/// Durable, append-only run history.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    async fn append(&self, log: &ExecutionLog) -> Result<(), StoreError>;

    /// Logs for `chain_id` whose start falls in `[from, to]`, oldest first.
    async fn query(
        &self,
        chain_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionLog>, StoreError>;
}
