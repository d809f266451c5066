// src/scheduler.rs
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::{CollectionOrchestrator, CollectorConfig, ConsumerPlan};
use crate::types::CollectionReport;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval: Duration,
    pub cleanup_interval: Duration,
}

impl From<&CollectorConfig> for SchedulerCfg {
    fn from(c: &CollectorConfig) -> Self {
        Self {
            interval: Duration::from_secs(c.interval_secs),
            cleanup_interval: Duration::from_secs(c.cleanup_interval_secs),
        }
    }
}

/// Periodic driver: refresh stale global pools, collect for every consumer,
/// and sweep queue orphans on a slower cadence.
pub struct Scheduler {
    orchestrator: Arc<CollectionOrchestrator>,
    plans: Vec<ConsumerPlan>,
    cfg: SchedulerCfg,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<CollectionOrchestrator>,
        plans: Vec<ConsumerPlan>,
        cfg: SchedulerCfg,
    ) -> Self {
        Self {
            orchestrator,
            plans,
            cfg,
        }
    }

    /// One collection cycle. Global sources whose snapshot expired are
    /// refreshed first so consumers share a single collect.
    pub async fn run_cycle(&self) -> Vec<CollectionReport> {
        for source_type in self.orchestrator.registry().global_types() {
            if self.orchestrator.pool().is_fresh(&source_type).await {
                continue;
            }
            if let Err(e) = self.orchestrator.refresh_global(&source_type).await {
                tracing::warn!(
                    target: "scheduler",
                    error = ?e,
                    source = %source_type,
                    "global refresh failed"
                );
            }
        }
        let reports = futures::future::join_all(
            self.plans
                .iter()
                .map(|p| self.orchestrator.collect_for_consumer(p)),
        )
        .await;
        counter!("collector_runs_total").increment(1);
        reports
    }

    /// Orphan sweep over every consumer that has a queue.
    pub async fn cleanup_cycle(&self) -> u64 {
        let queue = self.orchestrator.queue();
        let consumers = match queue.consumers().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(target: "scheduler", error = ?e, "listing queues failed");
                return 0;
            }
        };
        let mut removed = 0;
        for consumer in consumers {
            match queue.cleanup_expired(&consumer).await {
                Ok(n) => removed += n,
                Err(e) => {
                    tracing::warn!(
                        target: "scheduler",
                        error = ?e,
                        consumer = %consumer,
                        "queue cleanup failed"
                    )
                }
            }
        }
        removed
    }

    /// Runs until `shutdown` flips to `true` (or its sender is dropped).
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut collect = tokio::time::interval(self.cfg.interval);
            collect.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cleanup = tokio::time::interval(self.cfg.cleanup_interval);
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = collect.tick() => {
                        let reports = self.run_cycle().await;
                        let enqueued: usize = reports.iter().map(|r| r.enqueued).sum();
                        tracing::info!(
                            target: "scheduler",
                            consumers = reports.len(),
                            enqueued,
                            "collection tick"
                        );
                    }
                    _ = cleanup.tick() => {
                        let removed = self.cleanup_cycle().await;
                        tracing::debug!(target: "scheduler", removed, "cleanup tick");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!(target: "scheduler", "scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
