//! The rule engine: validation, chain runs, composition evaluation, and the
//! audit trail, behind one explicit value with injected stores and
//! capabilities.

pub mod composition;
pub mod context;
pub mod coordinator;
pub mod recorder;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capabilities::{ActionRegistry, ConditionRegistry};
use crate::config::EngineConfig;
use crate::error::{ChainError, Result};
use crate::rules::model::{RuleChain, RuleComposition};
use crate::rules::validator::{ValidationReport, Validator};
use crate::store::{DefinitionStore, ExecutionLogStore, RuleStore};

pub use composition::{ActionRunResult, CompositionEvaluator, CompositionOutcome, CompositionRun};
pub use context::{ChainExecution, ExecutionLog, ExecutionMetrics, ExecutionResult, RunState};
pub use coordinator::{Coordinator, RuleRunner};
pub use recorder::{ChainStatistics, Recorder};
pub use registry::DefinitionCache;

/// Everything the engine reads from or dispatches to.
#[derive(Clone)]
pub struct EngineDeps {
    pub rules: Arc<dyn RuleStore>,
    pub definitions: Arc<dyn DefinitionStore>,
    pub logs: Arc<dyn ExecutionLogStore>,
    pub conditions: Arc<ConditionRegistry>,
    pub actions: Arc<ActionRegistry>,
}

pub struct RuleEngine {
    config: EngineConfig,
    definitions: Arc<dyn DefinitionStore>,
    validator: Validator,
    coordinator: Coordinator,
    evaluator: CompositionEvaluator,
    recorder: Recorder,
    chains: DefinitionCache<RuleChain>,
    compositions: DefinitionCache<RuleComposition>,
}

impl RuleEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let validator = Validator::new(
            Arc::clone(&deps.rules),
            Arc::clone(&deps.conditions),
            Arc::clone(&deps.actions),
            config.min_execution_time,
        );
        let runner = RuleRunner::new(
            deps.rules,
            Arc::clone(&deps.conditions),
            Arc::clone(&deps.actions),
        );
        Self {
            coordinator: Coordinator::new(runner, config.default_max_execution_time),
            evaluator: CompositionEvaluator::new(deps.conditions, deps.actions),
            recorder: Recorder::new(deps.logs, config.recorder_timeout),
            definitions: deps.definitions,
            validator,
            chains: DefinitionCache::new(),
            compositions: DefinitionCache::new(),
            config,
        }
    }

    // ── Validation and authoring ────────────────────────────────────

    pub async fn validate_chain(&self, chain: &RuleChain) -> Result<ValidationReport> {
        Ok(self.validator.validate_chain(chain).await?)
    }

    pub async fn validate_composition(&self, composition: &RuleComposition) -> ValidationReport {
        self.validator.validate_composition(composition).await
    }

    /// Validate, persist, and cache a chain. Invalid chains are neither
    /// stored nor cached.
    pub async fn create_chain(&self, chain: RuleChain) -> Result<String> {
        self.validate_chain(&chain).await?.into_result()?;
        let id = self.definitions.create_chain(&chain).await?;
        self.chains.insert(chain).await;
        info!(chain = %id, "Chain created");
        Ok(id)
    }

    pub async fn create_composition(&self, composition: RuleComposition) -> Result<String> {
        self.validate_composition(&composition)
            .await
            .into_result()?;
        let id = self.definitions.create_composition(&composition).await?;
        self.compositions.insert(composition).await;
        info!(composition = %id, "Composition created");
        Ok(id)
    }

    // ── Definition cache ────────────────────────────────────────────

    /// Cached chain definition, if one is current.
    pub async fn cached_chain(&self, id: &str) -> Option<Arc<RuleChain>> {
        self.chains.get(id).await
    }

    /// Re-read a chain from the definition store and make that version
    /// current. A version already cached is reused without revalidation; a
    /// new one is validated first. A chain that no longer exists is evicted.
    pub async fn refresh_chain(&self, id: &str) -> Result<Arc<RuleChain>> {
        let Some(chain) = self.definitions.get_chain(id).await? else {
            self.chains.evict(id).await;
            return Err(ChainError::NotFound {
                kind: "chain",
                id: id.to_string(),
            }
            .into());
        };
        if let Some(cached) = self.chains.get_version(id, chain.version).await {
            self.chains.insert(chain).await;
            return Ok(cached);
        }
        self.validate_chain(&chain).await?.into_result()?;
        debug!(chain = %id, version = chain.version, "Chain cached");
        Ok(self.chains.insert(chain).await)
    }

    pub async fn evict_chain(&self, id: &str) -> bool {
        self.chains.evict(id).await
    }

    pub async fn refresh_composition(&self, id: &str) -> Result<Arc<RuleComposition>> {
        let Some(composition) = self.definitions.get_composition(id).await? else {
            self.compositions.evict(id).await;
            return Err(ChainError::NotFound {
                kind: "composition",
                id: id.to_string(),
            }
            .into());
        };
        self.cache_composition(composition).await
    }

    pub async fn evict_composition(&self, id: &str) -> bool {
        self.compositions.evict(id).await
    }

    async fn cache_composition(&self, composition: RuleComposition) -> Result<Arc<RuleComposition>> {
        if let Some(cached) = self
            .compositions
            .get_version(&composition.id, composition.version)
            .await
        {
            self.compositions.insert(composition).await;
            return Ok(cached);
        }
        self.validate_composition(&composition)
            .await
            .into_result()?;
        Ok(self.compositions.insert(composition).await)
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Run a chain against an inbound event.
    ///
    /// The stored definition is checked on every run: a deleted chain is
    /// evicted and refused, and a new version is validated and cached before
    /// it runs.
    ///
    /// Returns `Err` only for chain-level problems found before any rule
    /// runs. Rule failures and timeouts come back inside the result; check
    /// `errors` for partial failure.
    pub async fn execute_chain(&self, id: &str, event: Value) -> Result<ChainExecution> {
        let chain = self.refresh_chain(id).await?;
        let ctx = self.coordinator.run(chain, Arc::new(event)).await?;

        if let Err(e) = self.recorder.record(&ctx.to_log()).await {
            warn!(chain = %id, execution = %ctx.execution_id, error = %e, "Failed to record execution log");
        }
        Ok(ctx.into_execution())
    }

    /// Evaluate one composition. A disabled composition is a chain-level
    /// error rather than a silent non-trigger.
    pub async fn evaluate_composition(&self, id: &str, event: Value) -> Result<CompositionOutcome> {
        let composition = self.enabled_composition(id).await?;
        Ok(self.evaluator.evaluate(&composition, Arc::new(event)).await)
    }

    /// Evaluate a composition and execute its actions if it triggers.
    pub async fn run_composition(&self, id: &str, event: Value) -> Result<CompositionRun> {
        let composition = self.enabled_composition(id).await?;
        Ok(self.evaluator.run(&composition, Arc::new(event)).await)
    }

    /// Evaluate every enabled composition, highest priority first. Stored
    /// compositions that fail validation are skipped.
    pub async fn evaluate_all(&self, event: Value) -> Result<Vec<CompositionOutcome>> {
        let mut listed: Vec<RuleComposition> = self
            .definitions
            .list_compositions()
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .collect();
        listed.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let mut compositions = Vec::with_capacity(listed.len());
        for composition in listed {
            let id = composition.id.clone();
            match self.cache_composition(composition).await {
                Ok(cached) => compositions.push(cached),
                Err(e) => warn!(composition = %id, error = %e, "Skipping invalid composition"),
            }
        }

        let event = Arc::new(event);
        let evaluations = compositions
            .iter()
            .map(|c| self.evaluator.evaluate(c, Arc::clone(&event)));
        Ok(join_all(evaluations).await)
    }

    async fn enabled_composition(&self, id: &str) -> Result<Arc<RuleComposition>> {
        let composition = self.refresh_composition(id).await?;
        if !composition.enabled {
            return Err(ChainError::Disabled {
                kind: "composition",
                id: id.to_string(),
            }
            .into());
        }
        Ok(composition)
    }

    // ── Telemetry ───────────────────────────────────────────────────

    /// Aggregates over `window`, or the configured default window.
    pub async fn statistics(
        &self,
        chain_id: &str,
        window: Option<Duration>,
    ) -> Result<ChainStatistics> {
        let window = window.unwrap_or(self.config.statistics_window);
        Ok(self.recorder.statistics(chain_id, window).await?)
    }

    pub async fn history(
        &self,
        chain_id: &str,
        window: Option<Duration>,
    ) -> Result<Vec<ExecutionLog>> {
        let window = window.unwrap_or(self.config.statistics_window);
        Ok(self.recorder.history(chain_id, window).await?)
    }
}
