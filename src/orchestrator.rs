// src/orchestrator.rs
//! Two-phase hybrid collection for one consumer.
//!
//! Phase 1 fans out over every planned source at once: global sources are
//! served from the [`GlobalPool`] (collected and pooled on a miss), scoped
//! sources through the [`ScopedCache`]. Each collect is gated by the per-host
//! [`PolitenessLimiter`] and bounded by a timeout; a failing source only marks
//! its own [`SourceOutcome`].
//!
//! Phase 2 runs every sampled item through normalize, dedupe, filter and series
//! match on a bounded worker pool. Items that normalize to the same content hash
//! are merged. Survivors are then clustered with [`TopicClusterer`] so that each
//! item is credited with every source covering its topic, and finally scored and
//! enqueued. A hash is marked seen only after its enqueue call returned.

use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::classify::DynClassifier;
use crate::cluster::{self, ClusterInput, TopicClusterer};
use crate::config::{AppConfig, ConfigError};
use crate::dedup::Deduplicator;
use crate::filter::TermFilter;
use crate::metrics::ensure_metrics_described;
use crate::normalize::Normalizer;
use crate::pool::{GlobalPool, ScopedCache};
use crate::queue::QueueManager;
use crate::scoring::{ScoreContext, Scorer};
use crate::series::{SeriesMatch, SeriesMatcher};
use crate::sources::{PolitenessLimiter, RegisteredSource, SourceRegistry};
use crate::store::SharedStore;
use crate::types::{
    CollectionReport, NormalizedItem, RawItem, SourceOutcome, SourceParams, SourceScope,
};

fn default_item_workers() -> usize {
    4
}
fn default_source_timeout_secs() -> u64 {
    30
}
fn default_politeness_delay_ms() -> u64 {
    1000
}
fn default_http_timeout_secs() -> u64 {
    15
}
fn default_interval_secs() -> u64 {
    15 * 60
}
fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}

/// `[collector]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_item_workers")]
    pub item_workers: usize,
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Scheduler: collection cycle period.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Scheduler: queue orphan sweep period.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            item_workers: default_item_workers(),
            source_timeout_secs: default_source_timeout_secs(),
            politeness_delay_ms: default_politeness_delay_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            interval_secs: default_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.item_workers == 0 {
            return Err(ConfigError::Invalid("collector.item_workers must be > 0".into()));
        }
        if self.source_timeout_secs == 0 {
            return Err(ConfigError::ZeroTtl("collector.source_timeout_secs"));
        }
        if self.interval_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler intervals must be > 0".into()));
        }
        Ok(())
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

fn default_max_items() -> usize {
    100
}
fn default_language() -> String {
    "en".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub params: SourceParams,
}

/// What one consumer wants collected (`[[consumers]]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerPlan {
    pub consumer_id: String,
    #[serde(default)]
    pub sources: Vec<PlannedSource>,
    /// Cap on raw items entering phase 2 (balanced across sources).
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_language")]
    pub target_language: String,
    /// Per-consumer filter override; empty means the global `[filter]` rule.
    #[serde(default)]
    pub include_terms: Vec<String>,
    #[serde(default)]
    pub exclude_terms: Vec<String>,
    #[serde(default)]
    pub trend_momentum: HashMap<String, f64>,
    #[serde(default)]
    pub recent_terms: Vec<String>,
}

impl ConsumerPlan {
    pub fn new(consumer_id: &str) -> Self {
        Self {
            consumer_id: consumer_id.to_string(),
            sources: Vec::new(),
            max_items: default_max_items(),
            target_language: default_language(),
            include_terms: Vec::new(),
            exclude_terms: Vec::new(),
            trend_momentum: HashMap::new(),
            recent_terms: Vec::new(),
        }
    }

    pub fn with_source(mut self, source_type: &str, params: SourceParams) -> Self {
        self.sources.push(PlannedSource {
            source_type: source_type.to_string(),
            params,
        });
        self
    }
}

/// Takes every item when under `max`; otherwise each source gets `max / n`,
/// plus one for the first `max % n` sources ordered by size (largest first).
/// A source's share is the window starting at `round * share` (wrapping), so
/// successive rounds walk through a long feed instead of always taking its head.
pub fn balanced_sample(
    by_source: Vec<(String, Vec<RawItem>)>,
    max: usize,
    round: usize,
) -> Vec<RawItem> {
    let total: usize = by_source.iter().map(|(_, v)| v.len()).sum();
    if total <= max {
        return by_source.into_iter().flat_map(|(_, v)| v).collect();
    }
    let n = by_source.len();
    let base = max / n;
    let remainder = max % n;

    let mut sorted = by_source;
    sorted.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    let mut out = Vec::with_capacity(max);
    for (i, (_, mut items)) in sorted.into_iter().enumerate() {
        let allocation = (base + usize::from(i < remainder)).min(items.len());
        if allocation == 0 {
            continue;
        }
        let start = round.wrapping_mul(allocation) % items.len();
        items.rotate_left(start);
        items.truncate(allocation);
        out.extend(items);
    }
    out
}

enum ItemOutcome {
    Enqueued,
    Rejected,
    Failed(String),
}

struct Merged {
    item: NormalizedItem,
    sources: BTreeSet<String>,
}

/// An item that passed dedup and the filter.
struct Candidate {
    item: NormalizedItem,
    sources: BTreeSet<String>,
    series: SeriesMatch,
}

enum Screened {
    Duplicate,
    Filtered,
    Passed(Candidate),
}

pub struct CollectionOrchestrator {
    registry: SourceRegistry,
    classifier: DynClassifier,
    pool: GlobalPool,
    scoped: ScopedCache,
    dedup: Deduplicator,
    filter: TermFilter,
    scorer: Scorer,
    series: SeriesMatcher,
    clusterer: TopicClusterer,
    queue: QueueManager,
    politeness: PolitenessLimiter,
    config: CollectorConfig,
    /// Per-consumer sampling round.
    rounds: Mutex<HashMap<String, usize>>,
}

impl CollectionOrchestrator {
    pub fn new(
        store: SharedStore,
        registry: SourceRegistry,
        classifier: DynClassifier,
        config: &AppConfig,
    ) -> Self {
        ensure_metrics_described();
        Self {
            pool: GlobalPool::new(store.clone(), registry.global_types(), &config.pool),
            scoped: ScopedCache::new(store.clone(), &config.pool),
            dedup: Deduplicator::new(store.clone(), &config.dedup),
            filter: TermFilter::new(config.filter.clone()),
            scorer: Scorer::new(config.scoring.clone()),
            series: SeriesMatcher::new(config.series.clone()),
            clusterer: TopicClusterer::new(config.cluster.clone()),
            queue: QueueManager::new(store, config.queue.clone()),
            politeness: PolitenessLimiter::new(Duration::from_millis(
                config.collector.politeness_delay_ms,
            )),
            config: config.collector.clone(),
            rounds: Mutex::new(HashMap::new()),
            registry,
            classifier,
        }
    }

    fn next_round(&self, consumer_id: &str) -> usize {
        let mut rounds = self.rounds.lock();
        let slot = rounds.entry(consumer_id.to_string()).or_insert(0);
        let round = *slot;
        *slot = slot.wrapping_add(1);
        round
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn pool(&self) -> &GlobalPool {
        &self.pool
    }

    pub fn scoped_cache(&self) -> &ScopedCache {
        &self.scoped
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    async fn timed_collect(
        &self,
        source_type: &str,
        src: &RegisteredSource,
        params: &SourceParams,
    ) -> Result<Vec<RawItem>> {
        if let Some(host) = src.adapter.host() {
            self.politeness.acquire(host).await;
        }
        let timeout = self.config.source_timeout();
        tokio::time::timeout(timeout, src.adapter.collect(params))
            .await
            .map_err(|_| anyhow::anyhow!("{source_type} timed out after {}s", timeout.as_secs()))?
            .with_context(|| format!("{source_type} collection failed"))
    }

    /// Collects a global source and replaces its pool snapshot.
    pub async fn refresh_global(&self, source_type: &str) -> Result<usize> {
        let src = self
            .registry
            .get(source_type)
            .with_context(|| format!("unknown source type {source_type}"))?;
        anyhow::ensure!(
            src.adapter.scope() == SourceScope::Global,
            "{source_type} is not a global source"
        );
        let items = self
            .timed_collect(source_type, src, &SourceParams::new())
            .await?;
        self.pool.add(source_type, &items, None).await
    }

    async fn collect_source(
        &self,
        source_type: &str,
        params: &SourceParams,
    ) -> (SourceOutcome, Vec<RawItem>) {
        let mut outcome = SourceOutcome {
            source_type: source_type.to_string(),
            scope: SourceScope::Scoped,
            items: 0,
            from_cache: false,
            error: None,
        };
        let Some(src) = self.registry.get(source_type) else {
            outcome.error = Some(format!("unknown source type {source_type}"));
            return (outcome, Vec::new());
        };
        outcome.scope = src.adapter.scope();

        let result: Result<(Vec<RawItem>, bool)> = match outcome.scope {
            SourceScope::Global => {
                let pooled = self.pool.get(source_type).await;
                if !pooled.is_empty() {
                    Ok((pooled, true))
                } else {
                    match self
                        .timed_collect(source_type, src, &SourceParams::new())
                        .await
                    {
                        Ok(items) => {
                            if let Err(e) = self.pool.add(source_type, &items, None).await {
                                tracing::warn!(
                                    error = ?e,
                                    source = %source_type,
                                    "pool refresh failed"
                                );
                            }
                            Ok((items, false))
                        }
                        Err(e) => Err(e),
                    }
                }
            }
            SourceScope::Scoped if params.is_empty() => self
                .timed_collect(source_type, src, params)
                .await
                .map(|items| (items, false)),
            SourceScope::Scoped => {
                self.scoped
                    .get_or_collect(source_type, params, || {
                        self.timed_collect(source_type, src, params)
                    })
                    .await
            }
        };

        match result {
            Ok((items, from_cache)) => {
                outcome.items = items.len();
                outcome.from_cache = from_cache;
                (outcome, items)
            }
            Err(e) => {
                tracing::warn!(error = ?e, source = %source_type, "source collection failed");
                counter!("collector_source_errors_total", "source" => source_type.to_string())
                    .increment(1);
                outcome.error = Some(format!("{e:#}"));
                (outcome, Vec::new())
            }
        }
    }

    pub async fn collect_for_consumer(&self, plan: &ConsumerPlan) -> CollectionReport {
        let t0 = Instant::now();
        let consumer = plan.consumer_id.as_str();
        let mut report = CollectionReport {
            consumer_id: plan.consumer_id.clone(),
            ..CollectionReport::default()
        };

        // Phase 1: sources, all at once.
        let fetched = futures::future::join_all(
            plan.sources
                .iter()
                .map(|ps| self.collect_source(&ps.source_type, &ps.params)),
        )
        .await;

        let mut by_source = Vec::with_capacity(fetched.len());
        for (outcome, items) in fetched {
            match outcome.scope {
                SourceScope::Global => report.global_items += items.len(),
                SourceScope::Scoped => report.scoped_items += items.len(),
            }
            if let Some(err) = &outcome.error {
                report
                    .errors
                    .push(format!("{}: {err}", outcome.source_type));
            }
            if !items.is_empty() {
                by_source.push((outcome.source_type.clone(), items));
            }
            report.sources.push(outcome);
        }
        let reporting_sources = by_source.len();
        let sampled = balanced_sample(by_source, plan.max_items, self.next_round(consumer));
        report.collected = sampled.len();

        // Phase 2a: normalize, then merge items sharing a hash.
        let normalizer = Normalizer::new(self.classifier.clone(), plan.target_language.clone());
        let workers = self.config.item_workers.max(1);
        let mut normalized: Vec<(usize, Result<NormalizedItem>)> =
            stream::iter(sampled.into_iter().enumerate())
                .map(|(idx, raw)| {
                    let normalizer = &normalizer;
                    async move { (idx, normalizer.normalize(&raw).await) }
                })
                .buffer_unordered(workers)
                .collect()
                .await;
        normalized.sort_by_key(|(idx, _)| *idx);

        let mut merged: Vec<Merged> = Vec::new();
        let mut by_hash: HashMap<String, usize> = HashMap::new();
        for (_, res) in normalized {
            match res {
                Ok(item) => {
                    report.normalized += 1;
                    match by_hash.get(&item.content_hash) {
                        Some(&i) => {
                            merged[i].sources.insert(item.source_type.clone());
                        }
                        None => {
                            by_hash.insert(item.content_hash.clone(), merged.len());
                            merged.push(Merged {
                                sources: BTreeSet::from([item.source_type.clone()]),
                                item,
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        consumer = %consumer,
                        "normalization failed, item skipped"
                    );
                    report.failed += 1;
                    report.errors.push(format!("normalize: {e:#}"));
                }
            }
        }

        // Phase 2b: dedup, filter and series match.
        let override_filter;
        let filter = if plan.include_terms.is_empty() && plan.exclude_terms.is_empty() {
            &self.filter
        } else {
            override_filter =
                TermFilter::from_terms(plan.include_terms.clone(), plan.exclude_terms.clone());
            &override_filter
        };
        let recent: HashSet<String> =
            plan.recent_terms.iter().map(|t| t.to_lowercase()).collect();
        let momentum: HashMap<String, f64> = plan
            .trend_momentum
            .iter()
            .map(|(term, v)| (term.to_lowercase(), *v))
            .collect();

        let mut screened: Vec<(usize, Screened)> = stream::iter(merged.into_iter().enumerate())
            .map(|(idx, m)| async move { (idx, self.screen(consumer, filter, m).await) })
            .buffer_unordered(workers)
            .collect()
            .await;
        screened.sort_by_key(|(idx, _)| *idx);

        let mut candidates = Vec::new();
        for (_, s) in screened {
            match s {
                Screened::Duplicate => report.duplicates += 1,
                Screened::Filtered => report.filtered_out += 1,
                Screened::Passed(c) => candidates.push(c),
            }
        }

        // Phase 2c: group related items; each is credited with its cluster's sources.
        let source_counts = {
            let provisional: Vec<u8> = candidates
                .iter()
                .map(|c| {
                    let ctx = self.score_context(c, &momentum, &recent, c.sources.len());
                    self.scorer.total_for(&c.item, &ctx)
                })
                .collect();
            let inputs: Vec<ClusterInput<'_>> = candidates
                .iter()
                .zip(provisional)
                .map(|(c, score)| ClusterInput {
                    item: &c.item,
                    score,
                    sources: &c.sources,
                })
                .collect();
            let clusters = self.clusterer.cluster(&inputs, reporting_sources);
            report.clusters = clusters.len();
            report.multi_source_clusters =
                clusters.iter().filter(|c| c.source_count() > 1).count();
            cluster::source_counts(&clusters, inputs.len())
        };

        // Phase 2d: score and enqueue.
        let outcomes: Vec<ItemOutcome> = stream::iter(candidates.into_iter().zip(source_counts))
            .map(|(c, count)| self.admit(consumer, &momentum, &recent, c, count))
            .buffer_unordered(workers)
            .collect()
            .await;

        for o in outcomes {
            match o {
                ItemOutcome::Enqueued => {
                    report.scored += 1;
                    report.enqueued += 1;
                }
                ItemOutcome::Rejected => {
                    report.scored += 1;
                    report.rejected_by_queue += 1;
                }
                ItemOutcome::Failed(err) => {
                    report.failed += 1;
                    report.errors.push(err);
                }
            }
        }

        counter!("collector_items_collected_total").increment(report.collected as u64);
        counter!("collector_duplicates_total").increment(report.duplicates as u64);
        counter!("collector_filtered_total").increment(report.filtered_out as u64);
        counter!("collector_enqueued_total").increment(report.enqueued as u64);
        counter!("collector_queue_rejected_total").increment(report.rejected_by_queue as u64);
        histogram!("collector_run_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("collector_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        tracing::info!(
            consumer = %consumer,
            collected = report.collected,
            duplicates = report.duplicates,
            filtered = report.filtered_out,
            enqueued = report.enqueued,
            rejected = report.rejected_by_queue,
            errors = report.errors.len(),
            "collection run finished"
        );
        report
    }

    async fn screen(&self, consumer: &str, filter: &TermFilter, merged: Merged) -> Screened {
        let Merged { item, sources } = merged;

        if self.dedup.is_duplicate(&item, consumer).await.is_duplicate {
            return Screened::Duplicate;
        }

        let verdict = filter.filter(&item);
        if !verdict.passed {
            tracing::debug!(
                consumer = %consumer,
                title = %item.title_normalized,
                reason = ?verdict.reason,
                "item filtered"
            );
            return Screened::Filtered;
        }

        let series = self.series.match_item(&item);
        if series.matched {
            tracing::debug!(
                consumer = %consumer,
                series = ?series.series_id,
                boost = self.series.score_boost(&series),
                "series match"
            );
        }
        Screened::Passed(Candidate {
            item,
            sources,
            series,
        })
    }

    fn score_context(
        &self,
        candidate: &Candidate,
        momentum: &HashMap<String, f64>,
        recent: &HashSet<String>,
        source_count: usize,
    ) -> ScoreContext {
        let series = &candidate.series;
        ScoreContext {
            source_credibility: self
                .registry
                .get(&candidate.item.source_type)
                .map(|s| s.credibility),
            trend_momentum: momentum.clone(),
            recent_terms: recent.clone(),
            series_performance: series.performance.filter(|_| series.matched),
            source_count: source_count as u32,
        }
    }

    async fn admit(
        &self,
        consumer: &str,
        momentum: &HashMap<String, f64>,
        recent: &HashSet<String>,
        candidate: Candidate,
        source_count: usize,
    ) -> ItemOutcome {
        let ctx = self.score_context(&candidate, momentum, recent, source_count);
        let Candidate { item, series, .. } = candidate;
        let mut scored = self.scorer.score(item, &ctx);
        scored.series_id = series.series_id;

        let accepted = match self.queue.add(consumer, &scored).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    consumer = %consumer,
                    "enqueue failed, item not marked seen"
                );
                return ItemOutcome::Failed(format!("enqueue: {e:#}"));
            }
        };
        if let Err(e) = self.dedup.mark_seen(&scored.item, consumer).await {
            tracing::warn!(error = ?e, consumer = %consumer, "mark_seen failed");
        }
        if accepted {
            ItemOutcome::Enqueued
        } else {
            ItemOutcome::Rejected
        }
    }
}
