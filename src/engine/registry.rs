//! Read-through cache of validated chain and composition definitions.
//!
//! Entries are keyed by `(id, version)` and never replaced once inserted. A
//! separate pointer maps each id to its current version; refreshing a
//! definition inserts the new version, moves the pointer, and drops the
//! superseded entries. Readers holding an `Arc` keep their copy.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::rules::model::{RuleChain, RuleComposition};

/// A definition that can be cached by id and version.
pub trait Versioned: Send + Sync {
    fn id(&self) -> &str;
    fn version(&self) -> u32;
}

impl Versioned for RuleChain {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u32 {
        self.version
    }
}

impl Versioned for RuleComposition {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u32 {
        self.version
    }
}

struct CacheState<T> {
    entries: HashMap<(String, u32), Arc<T>>,
    current: HashMap<String, u32>,
}

pub struct DefinitionCache<T> {
    state: RwLock<CacheState<T>>,
}

impl<T: Versioned> DefinitionCache<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                current: HashMap::new(),
            }),
        }
    }

    /// Current version of `id`, if cached.
    pub async fn get(&self, id: &str) -> Option<Arc<T>> {
        let state = self.state.read().await;
        let version = *state.current.get(id)?;
        state.entries.get(&(id.to_string(), version)).cloned()
    }

    pub async fn get_version(&self, id: &str, version: u32) -> Option<Arc<T>> {
        self.state
            .read()
            .await
            .entries
            .get(&(id.to_string(), version))
            .cloned()
    }

    /// Cache a validated definition and make it current.
    ///
    /// An existing `(id, version)` entry is kept as is and returned, so two
    /// concurrent loads of the same version agree on a single instance.
    /// Other versions of the same id are dropped.
    pub async fn insert(&self, definition: T) -> Arc<T> {
        let (id, version) = (definition.id().to_string(), definition.version());
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .entry((id.clone(), version))
            .or_insert_with(|| Arc::new(definition))
            .clone();
        state
            .entries
            .retain(|(key_id, key_version), _| *key_id != id || *key_version == version);
        state.current.insert(id, version);
        entry
    }

    /// Drop `id` from the cache; the next lookup by id misses.
    pub async fn evict(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        state.entries.retain(|(key_id, _), _| key_id != id);
        state.current.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

impl<T: Versioned> Default for DefinitionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::ExecutionMode;

    fn chain(version: u32, rules: &[&str]) -> RuleChain {
        RuleChain::new("vip", ExecutionMode::Sequential, rules.iter().copied()).with_version(version)
    }

    #[tokio::test]
    async fn superseded_versions_are_dropped() {
        let cache = DefinitionCache::new();
        let v1 = cache.insert(chain(1, &["r1"])).await;
        let v2 = cache.insert(chain(2, &["r1", "r2"])).await;

        assert_eq!(cache.get("vip").await.unwrap().version, 2);
        assert!(cache.get_version("vip", 1).await.is_none());
        assert_eq!(cache.len().await, 1);
        // A holder of the old version still sees it.
        assert_eq!(v1.rule_ids, vec!["r1"]);
        assert_eq!(v2.rule_ids.len(), 2);

        let other = RuleChain::new("other", ExecutionMode::Parallel, ["r1"]);
        cache.insert(other).await;
        cache.insert(chain(3, &["r3"])).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.get("other").await.is_some());
    }

    #[tokio::test]
    async fn same_version_is_not_overwritten() {
        let cache = DefinitionCache::new();
        let first = cache.insert(chain(1, &["r1"])).await;
        let second = cache.insert(chain(1, &["r9"])).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.rule_ids, vec!["r1"]);
    }

    #[tokio::test]
    async fn evict_forgets_the_id() {
        let cache = DefinitionCache::new();
        let held = cache.insert(chain(1, &["r1"])).await;
        assert!(cache.evict("vip").await);
        assert!(cache.get("vip").await.is_none());
        assert!(cache.get_version("vip", 1).await.is_none());
        assert!(cache.is_empty().await);
        assert_eq!(held.version, 1);
        assert!(!cache.evict("vip").await);
    }
}
