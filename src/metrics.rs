// src/metrics.rs
use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(describe_all);
}

fn describe_all() {
    describe_counter!(
        "collector_items_collected_total",
        "Raw items entering the per-item pipeline after sampling."
    );
    describe_counter!(
        "collector_duplicates_total",
        "Items already seen by the consumer within the dedup window."
    );
    describe_counter!(
        "collector_filtered_total",
        "Items rejected by the term filter."
    );
    describe_counter!("collector_enqueued_total", "Items accepted by a queue.");
    describe_counter!(
        "collector_queue_rejected_total",
        "Scored items the queue refused (threshold or full)."
    );
    describe_counter!(
        "collector_source_errors_total",
        "Source collections that failed or timed out."
    );
    describe_counter!(
        "collector_runs_total",
        "Scheduler cycles completed (all consumers collected)."
    );
    describe_counter!(
        "queue_evictions_total",
        "Lowest-priority entries evicted by a higher-scoring item."
    );
    describe_counter!(
        "queue_orphans_removed_total",
        "Queue index entries dropped because their payload had expired."
    );
    describe_histogram!(
        "collector_run_ms",
        "Duration of one consumer collection run in milliseconds."
    );
    describe_gauge!(
        "collector_last_run_ts",
        "Unix ts when a collection run last finished."
    );
}

pub struct Metrics {
    /// `None` when the exporter owns its own HTTP listener.
    pub handle: Option<PrometheusHandle>,
}

impl Metrics {
    /// Installs the Prometheus recorder. With `listen` set the exporter serves
    /// `/metrics` itself; otherwise the handle is returned for rendering.
    pub fn init(listen: Option<SocketAddr>) -> Result<Self> {
        let builder = PrometheusBuilder::new();
        let handle = match listen {
            Some(addr) => {
                builder
                    .with_http_listener(addr)
                    .install()
                    .context("prometheus: install exporter")?;
                tracing::info!(%addr, "metrics exporter listening");
                None
            }
            None => Some(
                builder
                    .install_recorder()
                    .context("prometheus: install recorder")?,
            ),
        };
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Reads `METRICS_ADDR` (e.g. `0.0.0.0:9000`).
    pub fn listen_addr_from_env() -> Result<Option<SocketAddr>> {
        match std::env::var("METRICS_ADDR") {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse()
                .map(Some)
                .with_context(|| format!("invalid METRICS_ADDR {s}")),
            _ => Ok(None),
        }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}
