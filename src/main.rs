//! Topic collector binary entrypoint.
//! Loads config, wires store + sources + classifier into the orchestrator and
//! runs the periodic scheduler until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use topic_collector::classify::build_classifier;
use topic_collector::metrics::Metrics;
use topic_collector::scheduler::{Scheduler, SchedulerCfg};
use topic_collector::sources::SourceRegistry;
use topic_collector::{AppConfig, CollectionOrchestrator, MemoryStore, SharedStore};

/// Compact logs by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("topic_collector=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default().context("loading collector config")?;
    let metrics = Metrics::init(Metrics::listen_addr_from_env()?)?;

    let store: SharedStore = Arc::new(MemoryStore::new());
    let registry = SourceRegistry::from_config(
        &config.sources,
        Duration::from_secs(config.collector.http_timeout_secs),
    )?;
    for (source, healthy) in registry.health().await {
        if !healthy {
            tracing::warn!(%source, "source failed health check");
        }
    }
    let classifier = build_classifier(&config.ai);
    tracing::info!(
        sources = registry.len(),
        consumers = config.consumers.len(),
        classifier = classifier.name(),
        "collector starting"
    );

    let orchestrator = Arc::new(CollectionOrchestrator::new(
        store, registry, classifier, &config,
    ));
    let scheduler = Scheduler::new(
        orchestrator,
        config.consumers.clone(),
        SchedulerCfg::from(&config.collector),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = scheduler.spawn(stop_rx);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    let _ = stop_tx.send(true);
    task.await.context("scheduler task panicked")?;

    if let Some(snapshot) = metrics.render() {
        tracing::debug!(metrics = %snapshot, "final metrics snapshot");
    }
    Ok(())
}
