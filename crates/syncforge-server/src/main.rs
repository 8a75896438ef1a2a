//! syncforged: the replication orchestrator server process.
//!
//! Wires the configuration store, trigger scheduler and replication engine
//! together and runs until interrupted. The filesystem and bulk-copy seams
//! are bound to the in-memory implementations here; cluster-backed
//! implementations plug into the same builder.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use syncforge_common::config::SyncforgeConfig;
use syncforge_repl::memory::{MemoryCopyEngine, MemoryFs};
use syncforge_repl::plugin::PluginRegistry;
use syncforge_repl::snapshot::SnapshotReplicator;
use syncforge_sched::TriggerScheduler;
use syncforge_server::OrchestratorBuilder;
use syncforge_store::ConfigurationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SyncforgeConfig::load(Path::new(&path))
            .with_context(|| format!("loading config from {path}"))?,
        None => SyncforgeConfig::default(),
    };

    let store = Arc::new(
        ConfigurationStore::open(
            config.store.root.clone(),
            config.store.restore_workers,
            Duration::from_secs(config.store.restore_timeout_secs),
        )
        .context("opening configuration store")?,
    );

    let scheduler = Arc::new(TriggerScheduler::new(
        Duration::from_secs(config.scheduler.reaper_interval_secs),
        Duration::from_secs(1),
    ));

    let source_fs = Arc::new(MemoryFs::new());
    let target_fs = Arc::new(MemoryFs::new());
    let replicator = Arc::new(SnapshotReplicator::new(
        source_fs,
        target_fs,
        Arc::new(MemoryCopyEngine::new()),
    ));

    // explicit registration table; plugin constructors are added here
    let plugins = PluginRegistry::new();

    let orchestrator = OrchestratorBuilder::new(config, store, scheduler, replicator)
        .with_plugins(plugins)
        .build();

    let report = orchestrator.start().await.context("starting orchestrator")?;
    info!(
        clusters = report.clusters,
        policies = report.policies,
        "syncforged is up"
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    orchestrator.shutdown();
    Ok(())
}
