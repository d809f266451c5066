use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use topic_collector::classify::{Classification, Classifier, DynClassifier};
use topic_collector::series::SeriesDefinition;
use topic_collector::sources::SourceRegistry;
use topic_collector::testing::{FailingSource, FixedClassifier, StaticSource};
use topic_collector::types::{ParamValue, SourceParams, SourceScope};
use topic_collector::{
    AppConfig, CollectionOrchestrator, ConsumerPlan, MemoryStore, RawItem, SharedStore,
};

fn raw(source: &str, id: &str, title: &str) -> RawItem {
    RawItem::new(source, id, title)
}

fn classifier() -> DynClassifier {
    Arc::new(FixedClassifier::new(Classification {
        keywords: vec!["rust".into()],
        ..Classification::default()
    }))
}

/// Keywords are the title's words of three or more letters.
struct TitleWords;

#[async_trait]
impl Classifier for TitleWords {
    fn name(&self) -> &'static str {
        "title-words"
    }

    async fn classify(&self, title: &str, _body: Option<&str>) -> Result<Classification> {
        let keywords = title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 3 && !w.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_lowercase)
            .collect();
        Ok(Classification {
            keywords,
            categories: Vec::new(),
            ..Classification::default()
        })
    }

    async fn translate(&self, text: &str, _src: &str, _dst: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

fn orchestrator_with(
    registry: SourceRegistry,
    config: &AppConfig,
    classifier: DynClassifier,
) -> (Arc<MemoryStore>, CollectionOrchestrator) {
    let mem = Arc::new(MemoryStore::new());
    let store: SharedStore = mem.clone();
    let orch = CollectionOrchestrator::new(store, registry, classifier, config);
    (mem, orch)
}

fn orchestrator(
    registry: SourceRegistry,
    config: &AppConfig,
) -> (Arc<MemoryStore>, CollectionOrchestrator) {
    orchestrator_with(registry, config, classifier())
}

fn params(keyword: &str) -> SourceParams {
    let mut p = SourceParams::new();
    p.insert("keywords".into(), ParamValue::One(keyword.into()));
    p
}

#[tokio::test]
async fn same_story_from_two_sources_is_merged_and_boosted() {
    let hn = StaticSource::global(
        "hn",
        vec![
            raw("hn", "1", "Rust 2.0 released"),
            raw("hn", "2", "Only on HN"),
        ],
    );
    let hn_calls = hn.calls();
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(hn), 5.0).unwrap();
    registry
        .register(
            Arc::new(StaticSource::global(
                "lobsters",
                vec![raw("lobsters", "a", "Show HN: Rust 2.0 Released")],
            )),
            5.0,
        )
        .unwrap();
    // exact-hash merging only; every item here shares the classifier's keywords
    let mut config = AppConfig::default();
    config.cluster.enabled = false;
    let (_mem, orch) = orchestrator(registry, &config);

    let plan = ConsumerPlan::new("blog")
        .with_source("hn", SourceParams::new())
        .with_source("lobsters", SourceParams::new());
    let report = orch.collect_for_consumer(&plan).await;

    assert_eq!(report.global_items, 3);
    assert_eq!(report.collected, 3);
    assert_eq!(report.normalized, 3);
    assert_eq!(report.enqueued, 2);
    assert!(report.errors.is_empty());

    let queued = orch.queue().get_batch("blog", 10, false).await.unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].item.title_normalized, "rust 2.0 released");
    assert_eq!(queued[0].score_total, 52);
    assert_eq!(queued[1].score_total, 42);

    // second run: served from the pool, everything already seen
    let again = orch.collect_for_consumer(&plan).await;
    assert!(again.sources.iter().all(|s| s.from_cache));
    assert_eq!(hn_calls.load(Ordering::SeqCst), 1);
    assert_eq!(again.duplicates, 2);
    assert_eq!(again.enqueued, 0);

    // another consumer has its own dedup window and queue
    let newsletter = ConsumerPlan::new("newsletter").with_source("hn", SourceParams::new());
    let other = orch.collect_for_consumer(&newsletter).await;
    assert_eq!(other.enqueued, 2);
}

#[tokio::test]
async fn failing_source_does_not_stop_the_others() {
    let mut registry = SourceRegistry::new();
    registry
        .register(Arc::new(FailingSource::new("flaky", SourceScope::Scoped)), 5.0)
        .unwrap();
    registry
        .register(
            Arc::new(StaticSource::scoped(
                "reddit",
                vec![raw("reddit", "r1", "Rust in production")],
            )),
            5.0,
        )
        .unwrap();
    let (_mem, orch) = orchestrator(registry, &AppConfig::default());

    let plan = ConsumerPlan::new("blog")
        .with_source("flaky", params("rust"))
        .with_source("reddit", params("rust"))
        .with_source("unknown", SourceParams::new());
    let report = orch.collect_for_consumer(&plan).await;

    assert_eq!(report.sources.len(), 3);
    assert!(report.sources[0].error.as_deref().unwrap().contains("flaky is down"));
    assert!(report.sources[1].error.is_none());
    assert!(report.sources[2].error.is_some());
    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.scoped_items, 1);
    assert_eq!(report.enqueued, 1);
}

#[tokio::test]
async fn scoped_results_are_cached_per_params() {
    let reddit = StaticSource::scoped("reddit", vec![raw("reddit", "r1", "Rust tips")]);
    let calls = reddit.calls();
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(reddit), 5.0).unwrap();
    let (_mem, orch) = orchestrator(registry, &AppConfig::default());

    let a = ConsumerPlan::new("a").with_source("reddit", params("rust"));
    let b = ConsumerPlan::new("b").with_source("reddit", params("rust"));
    let c = ConsumerPlan::new("c").with_source("reddit", params("go"));
    assert!(!orch.collect_for_consumer(&a).await.sources[0].from_cache);
    assert!(orch.collect_for_consumer(&b).await.sources[0].from_cache);
    assert!(!orch.collect_for_consumer(&c).await.sources[0].from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_enqueue_is_not_marked_seen() {
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(StaticSource::scoped("reddit", vec![raw("reddit", "r1", "Rust news")])),
            5.0,
        )
        .unwrap();
    let (mem, orch) = orchestrator(registry, &AppConfig::default());
    let plan = ConsumerPlan::new("blog").with_source("reddit", SourceParams::new());

    mem.set_online(false);
    let down = orch.collect_for_consumer(&plan).await;
    assert_eq!(down.failed, 1);
    assert_eq!(down.enqueued, 0);
    assert!(down.errors.iter().any(|e| e.starts_with("enqueue")));

    mem.set_online(true);
    let up = orch.collect_for_consumer(&plan).await;
    assert_eq!(up.duplicates, 0);
    assert_eq!(up.enqueued, 1);
}

#[tokio::test]
async fn rejected_items_still_count_as_processed() {
    let mut config = AppConfig::default();
    config.queue.min_score_threshold = 50;
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(StaticSource::scoped("reddit", vec![raw("reddit", "r1", "Meh")])),
            5.0,
        )
        .unwrap();
    let (_mem, orch) = orchestrator(registry, &config);
    let plan = ConsumerPlan::new("blog").with_source("reddit", SourceParams::new());

    let first = orch.collect_for_consumer(&plan).await;
    assert_eq!(first.scored, 1);
    assert_eq!(first.rejected_by_queue, 1);
    assert_eq!(first.enqueued, 0);

    let second = orch.collect_for_consumer(&plan).await;
    assert_eq!(second.duplicates, 1);
}

#[tokio::test]
async fn consumer_filter_override_and_sampling() {
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(StaticSource::scoped(
                "reddit",
                vec![
                    raw("reddit", "1", "Crypto pump incoming"),
                    raw("reddit", "2", "Rust borrow checker"),
                    raw("reddit", "3", "Rust async"),
                ],
            )),
            5.0,
        )
        .unwrap();
    registry
        .register(
            Arc::new(StaticSource::scoped(
                "lobsters",
                vec![
                    raw("lobsters", "a", "Zig comptime"),
                    raw("lobsters", "b", "Go generics"),
                ],
            )),
            5.0,
        )
        .unwrap();
    let (_mem, orch) = orchestrator(registry, &AppConfig::default());

    let mut plan = ConsumerPlan::new("blog")
        .with_source("reddit", SourceParams::new())
        .with_source("lobsters", SourceParams::new());
    plan.exclude_terms = vec!["Crypto".into()];
    plan.max_items = 4;

    let report = orch.collect_for_consumer(&plan).await;
    assert_eq!(report.scoped_items, 5);
    assert_eq!(report.collected, 4);
    assert_eq!(report.filtered_out, 1);
    assert_eq!(report.enqueued, 3);
}

#[tokio::test(start_paused = true)]
async fn slow_source_times_out() {
    let mut config = AppConfig::default();
    config.collector.source_timeout_secs = 1;
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(
                StaticSource::scoped("slow", vec![raw("slow", "1", "Late news")])
                    .with_delay(Duration::from_secs(30)),
            ),
            5.0,
        )
        .unwrap();
    let (_mem, orch) = orchestrator(registry, &config);

    let report = orch
        .collect_for_consumer(&ConsumerPlan::new("blog").with_source("slow", SourceParams::new()))
        .await;
    assert_eq!(report.collected, 0);
    assert!(report.sources[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn series_match_tags_and_boosts_items() {
    let mut config = AppConfig::default();
    config.series.series.push(SeriesDefinition {
        id: "rust-weekly".into(),
        name: "Rust Weekly".into(),
        terms: vec!["rust".into()],
        min_similarity: 0.6,
        enabled: true,
        performance: Some(0.9),
    });
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(StaticSource::scoped("reddit", vec![raw("reddit", "1", "Rust 1.90")])),
            5.0,
        )
        .unwrap();
    let (_mem, orch) = orchestrator(registry, &config);

    orch.collect_for_consumer(&ConsumerPlan::new("blog").with_source("reddit", SourceParams::new()))
        .await;
    let top = orch.queue().get_next("blog").await.unwrap().unwrap();
    assert_eq!(top.series_id.as_deref(), Some("rust-weekly"));
    assert_eq!(top.score_total, 72);
}

#[tokio::test]
async fn refresh_global_only_accepts_global_sources() {
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(StaticSource::global("hn", vec![raw("hn", "1", "A"), raw("hn", "2", "B")])),
            5.0,
        )
        .unwrap();
    registry
        .register(Arc::new(StaticSource::scoped("reddit", vec![])), 5.0)
        .unwrap();
    let (_mem, orch) = orchestrator(registry, &AppConfig::default());

    assert_eq!(orch.refresh_global("hn").await.unwrap(), 2);
    assert!(orch.pool().is_fresh("hn").await);
    assert!(orch.refresh_global("reddit").await.is_err());
    assert!(orch.refresh_global("nope").await.is_err());
}

#[tokio::test]
async fn related_headlines_share_the_multi_source_bonus() {
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(StaticSource::global(
                "hn",
                vec![raw("hn", "1", "Rust 2.0 released today")],
            )),
            5.0,
        )
        .unwrap();
    registry
        .register(
            Arc::new(StaticSource::scoped(
                "lobsters",
                vec![
                    raw("lobsters", "a", "Rust 2.0 released with async closures"),
                    raw("lobsters", "b", "Gardening tips for spring"),
                ],
            )),
            5.0,
        )
        .unwrap();
    let (_mem, orch) = orchestrator_with(registry, &AppConfig::default(), Arc::new(TitleWords));

    let plan = ConsumerPlan::new("blog")
        .with_source("hn", SourceParams::new())
        .with_source("lobsters", SourceParams::new());
    let report = orch.collect_for_consumer(&plan).await;

    // different hashes, so nothing is merged or dropped
    assert_eq!(report.enqueued, 3);
    assert_eq!(report.clusters, 2);
    assert_eq!(report.multi_source_clusters, 1);

    let queued = orch.queue().get_batch("blog", usize::MAX, false).await.unwrap();
    let totals: BTreeMap<String, u8> = queued
        .into_iter()
        .map(|s| (s.item.title_normalized, s.score_total))
        .collect();
    assert_eq!(totals["rust 2.0 released today"], 52);
    assert_eq!(totals["rust 2.0 released with async closures"], 52);
    assert_eq!(totals["gardening tips for spring"], 42);
}

#[tokio::test]
async fn trend_terms_match_regardless_of_case() {
    let mut registry = SourceRegistry::new();
    registry
        .register(
            Arc::new(StaticSource::scoped("reddit", vec![raw("reddit", "1", "Rust news")])),
            5.0,
        )
        .unwrap();
    let (_mem, orch) = orchestrator(registry, &AppConfig::default());

    let mut plan = ConsumerPlan::new("blog").with_source("reddit", SourceParams::new());
    plan.trend_momentum.insert("Rust".into(), 1.0);
    orch.collect_for_consumer(&plan).await;

    let top = orch.queue().get_next("blog").await.unwrap().unwrap();
    assert_eq!(top.score_trend, 1.0);
    assert_eq!(top.score_total, 52);
}
