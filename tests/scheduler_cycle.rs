use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use topic_collector::classify::build_classifier;
use topic_collector::orchestrator::PlannedSource;
use topic_collector::scheduler::{Scheduler, SchedulerCfg};
use topic_collector::sources::{SourceConfig, SourceKind, SourceRegistry};
use topic_collector::types::{SourceParams, SourceScope};
use topic_collector::{AppConfig, CollectionOrchestrator, ConsumerPlan, MemoryStore, SharedStore};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/feed.xml")
}

fn setup() -> (Arc<CollectionOrchestrator>, Vec<ConsumerPlan>) {
    let mut config = AppConfig::default();
    config.filter.exclude_keywords = vec!["crypto".into()];
    config.collector.politeness_delay_ms = 0;
    config.sources = vec![SourceConfig {
        source_type: "digest".into(),
        kind: SourceKind::Rss,
        scope: SourceScope::Global,
        url: None,
        fixture: Some(fixture()),
        weight: 2.5,
    }];
    let mut plan = ConsumerPlan::new("dev-blog");
    plan.sources.push(PlannedSource {
        source_type: "digest".into(),
        params: SourceParams::new(),
    });
    config.consumers = vec![plan];
    config.validate().unwrap();

    let registry = SourceRegistry::from_config(&config.sources, Duration::from_secs(5)).unwrap();
    let store: SharedStore = Arc::new(MemoryStore::new());
    let orch = CollectionOrchestrator::new(store, registry, build_classifier(&config.ai), &config);
    (Arc::new(orch), config.consumers.clone())
}

#[tokio::test]
async fn cycle_refreshes_pool_and_fills_queue() {
    let (orch, plans) = setup();
    let scheduler = Scheduler::new(
        orch.clone(),
        plans,
        SchedulerCfg {
            interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        },
    );

    let reports = scheduler.run_cycle().await;
    assert_eq!(reports.len(), 1);
    let r = &reports[0];
    assert_eq!(r.collected, 4);
    assert_eq!(r.filtered_out, 1);
    assert_eq!(r.enqueued, 3);
    assert!(r.sources[0].from_cache, "pool was refreshed before collection");
    assert_eq!(orch.pool().metadata("digest").await.unwrap().count, 4);

    let top = orch.queue().peek_next("dev-blog").await.unwrap().unwrap();
    assert!(top.score_total >= 30);

    let again = scheduler.run_cycle().await;
    assert_eq!(again[0].duplicates, 3);
    assert_eq!(scheduler.cleanup_cycle().await, 0);
}

#[tokio::test(start_paused = true)]
async fn spawned_scheduler_stops_on_signal() {
    let (orch, plans) = setup();
    let scheduler = Scheduler::new(
        orch.clone(),
        plans,
        SchedulerCfg {
            interval: Duration::from_secs(900),
            cleanup_interval: Duration::from_secs(3600),
        },
    );
    let (tx, rx) = watch::channel(false);
    let handle = scheduler.spawn(rx);

    // first tick fires immediately
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(orch.queue().stats("dev-blog").await.unwrap().pending, 3);

    tx.send(true).unwrap();
    handle.await.unwrap();
}
