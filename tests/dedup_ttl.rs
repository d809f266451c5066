use std::sync::Arc;
use std::time::Duration;

use topic_collector::dedup::{DedupConfig, DedupReason, Deduplicator};
use topic_collector::testing::normalized;
use topic_collector::{MemoryStore, SharedStore};

fn dedup(days: u32) -> (Arc<MemoryStore>, Deduplicator) {
    let mem = Arc::new(MemoryStore::new());
    let store: SharedStore = mem.clone();
    (mem, Deduplicator::new(store, &DedupConfig { ttl_days: days }))
}

#[tokio::test]
async fn check_is_read_only_until_marked() {
    let (_mem, d) = dedup(7);
    let item = normalized("rust 2.0 released", &["rust"], &["tech"]);

    assert!(!d.is_duplicate(&item, "blog").await.is_duplicate);
    // checking twice does not mark anything
    assert!(!d.is_duplicate(&item, "blog").await.is_duplicate);

    d.mark_seen(&item, "blog").await.unwrap();
    let out = d.is_duplicate(&item, "blog").await;
    assert!(out.is_duplicate);
    assert_eq!(out.reason, Some(DedupReason::ExactHash));
    assert_eq!(out.duplicate_of.as_deref(), Some(item.content_hash.as_str()));

    // other consumers have their own window
    assert!(!d.is_duplicate(&item, "newsletter").await.is_duplicate);
}

#[tokio::test]
async fn term_order_does_not_matter_but_wording_does() {
    let (_mem, d) = dedup(7);
    d.mark_seen(&normalized("launch day", &["ai", "ml"], &[]), "c")
        .await
        .unwrap();
    assert!(
        d.is_duplicate(&normalized("launch day", &["ml", "ai"], &[]), "c")
            .await
            .is_duplicate
    );
    assert!(
        !d.is_duplicate(&normalized("launch day!", &["ai", "ml"], &[]), "c")
            .await
            .is_duplicate
    );
}

#[tokio::test(start_paused = true)]
async fn mark_expires_after_ttl() {
    let (_mem, d) = dedup(1);
    let item = normalized("short lived", &[], &[]);
    d.mark_seen(&item, "c").await.unwrap();

    tokio::time::advance(Duration::from_secs(86_400 - 1)).await;
    assert!(d.is_duplicate(&item, "c").await.is_duplicate);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!d.is_duplicate(&item, "c").await.is_duplicate);
}

#[tokio::test]
async fn forget_and_store_failures() {
    let (mem, d) = dedup(7);
    let item = normalized("flaky", &[], &[]);
    d.mark_seen(&item, "c").await.unwrap();
    assert!(d.forget(&item, "c").await.unwrap());
    assert!(!d.forget(&item, "c").await.unwrap());

    mem.set_online(false);
    // read path degrades to "new", write path reports the failure
    assert!(!d.is_duplicate(&item, "c").await.is_duplicate);
    assert!(d.mark_seen(&item, "c").await.is_err());
}
