//! In-process stores backed by `RwLock<HashMap>`.
//!
//! Used by the CLI when definitions come from a JSON file, and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::engine::context::ExecutionLog;
use crate::error::StoreError;
use crate::rules::model::{Rule, RuleChain, RuleComposition};
use crate::store::traits::{DefinitionStore, ExecutionLogStore, RuleStore};

#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<String, Rule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: RwLock::new(rules.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    pub async fn insert(&self, rule: Rule) {
        self.rules.write().await.insert(rule.id.clone(), rule);
    }

    pub async fn remove(&self, id: &str) -> Option<Rule> {
        self.rules.write().await.remove(id)
    }

    /// Flip a rule's `enabled` flag. Returns false if the rule is unknown.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.rules.write().await.get_mut(id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn get_rules_by_ids(&self, ids: &[String]) -> Result<Vec<Rule>, StoreError> {
        let rules = self.rules.read().await;
        Ok(ids.iter().filter_map(|id| rules.get(id).cloned()).collect())
    }

    async fn get_rule(&self, id: &str) -> Result<Option<Rule>, StoreError> {
        Ok(self.rules.read().await.get(id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryDefinitionStore {
    chains: RwLock<HashMap<String, RuleChain>>,
    compositions: RwLock<HashMap<String, RuleComposition>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delete_chain(&self, id: &str) -> bool {
        self.chains.write().await.remove(id).is_some()
    }

    pub async fn delete_composition(&self, id: &str) -> bool {
        self.compositions.write().await.remove(id).is_some()
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn get_chain(&self, id: &str) -> Result<Option<RuleChain>, StoreError> {
        Ok(self.chains.read().await.get(id).cloned())
    }

    async fn create_chain(&self, chain: &RuleChain) -> Result<String, StoreError> {
        self.chains
            .write()
            .await
            .insert(chain.id.clone(), chain.clone());
        Ok(chain.id.clone())
    }

    async fn get_composition(&self, id: &str) -> Result<Option<RuleComposition>, StoreError> {
        Ok(self.compositions.read().await.get(id).cloned())
    }

    async fn create_composition(
        &self,
        composition: &RuleComposition,
    ) -> Result<String, StoreError> {
        self.compositions
            .write()
            .await
            .insert(composition.id.clone(), composition.clone());
        Ok(composition.id.clone())
    }

    async fn list_compositions(&self) -> Result<Vec<RuleComposition>, StoreError> {
        Ok(self.compositions.read().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryLogStore {
    logs: RwLock<Vec<ExecutionLog>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.logs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.read().await.is_empty()
    }
}

#[async_trait]
impl ExecutionLogStore for MemoryLogStore {
    async fn append(&self, log: &ExecutionLog) -> Result<(), StoreError> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    async fn query(
        &self,
        chain_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionLog>, StoreError> {
        let mut logs: Vec<ExecutionLog> = self
            .logs
            .read()
            .await
            .iter()
            .filter(|l| l.chain_id == chain_id && l.started_at >= from && l.started_at <= to)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.started_at);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{ActionDescriptor, ConditionDescriptor};
    use serde_json::json;

    fn rule(id: &str) -> Rule {
        Rule::new(
            id,
            ConditionDescriptor::new("always", json!(null)),
            ActionDescriptor::new("log", json!({})),
        )
    }

    #[tokio::test]
    async fn missing_rules_are_absent() {
        let store = MemoryRuleStore::with_rules([rule("a"), rule("b")]);
        let found = store
            .get_rules_by_ids(&["a".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[tokio::test]
    async fn set_enabled_updates_rule() {
        let store = MemoryRuleStore::with_rules([rule("a")]);
        assert!(store.set_enabled("a", false).await);
        assert!(!store.get_rule("a").await.unwrap().unwrap().enabled);
        assert!(!store.set_enabled("nope", false).await);
    }
}
