use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::Value;

use triage_engine::capabilities::{ActionRegistry, ConditionRegistry};
use triage_engine::config::EngineConfig;
use triage_engine::rules::{Rule, RuleChain, RuleComposition};
use triage_engine::store::{
    DefinitionStore, ExecutionLogStore, LibSqlLogStore, MemoryDefinitionStore, MemoryRuleStore,
};
use triage_engine::{EngineDeps, RuleEngine};

/// Definitions file layout.
#[derive(Debug, Default, Deserialize)]
struct Definitions {
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    chains: Vec<RuleChain>,
    #[serde(default)]
    compositions: Vec<RuleComposition>,
}

fn usage() -> ! {
    eprintln!("Usage: triage-engine <definitions.json> <chain-id> [event.json]");
    eprintln!("  Reads the event from stdin when no event file is given.");
    std::process::exit(2);
}

fn read_event(path: Option<&str>) -> anyhow::Result<Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("Event is not valid JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (defs_path, chain_id) = match args.as_slice() {
        [defs, chain, ..] => (defs.as_str(), chain.as_str()),
        _ => usage(),
    };
    if args.len() > 3 {
        usage();
    }

    let config = EngineConfig::from_env()?;

    let raw = std::fs::read_to_string(defs_path)
        .with_context(|| format!("Failed to read definitions file {defs_path}"))?;
    let defs: Definitions =
        serde_json::from_str(&raw).context("Definitions file is not valid JSON")?;
    if !defs.chains.iter().any(|c| c.id == chain_id) {
        bail!("chain {chain_id} is not defined in {defs_path}");
    }
    let event = read_event(args.get(2).map(String::as_str))?;

    // ── Stores ──────────────────────────────────────────────────────────
    let rules = Arc::new(MemoryRuleStore::with_rules(defs.rules));
    let definitions = Arc::new(MemoryDefinitionStore::new());
    for chain in &defs.chains {
        definitions.create_chain(chain).await?;
    }
    for composition in &defs.compositions {
        definitions.create_composition(composition).await?;
    }
    let logs: Arc<dyn ExecutionLogStore> =
        Arc::new(LibSqlLogStore::new_local(&config.db_path).await?);

    let engine = RuleEngine::new(
        config,
        EngineDeps {
            rules,
            definitions,
            logs,
            conditions: Arc::new(ConditionRegistry::with_builtins()),
            actions: Arc::new(ActionRegistry::with_builtins()),
        },
    );

    let execution = engine.execute_chain(chain_id, event).await?;
    println!("{}", serde_json::to_string_pretty(&execution)?);

    let stats = engine.statistics(chain_id, None).await?;
    tracing::info!(
        chain = %chain_id,
        total = stats.total_executions,
        success_rate = stats.success_rate,
        avg_ms = stats.avg_execution_time_ms,
        "Chain statistics"
    );

    if !execution.success {
        std::process::exit(1);
    }
    Ok(())
}
