use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use topic_collector::queue::{QueueConfig, QueueManager};
use topic_collector::store::{
    keys, BatchOp, BoundedInsert, RangeOrder, ScoredMember, StoreError, StoreResult,
};
use topic_collector::testing::normalized;
use topic_collector::{KvStore, MemoryStore, ScoredItem, SharedStore};

fn scored(title: &str, total: u8) -> ScoredItem {
    ScoredItem {
        item: normalized(title, &[], &[]),
        score_source: 0.5,
        score_freshness: 0.5,
        score_trend: 0.0,
        score_relevance: 0.5,
        score_total: total,
        series_id: None,
    }
}

fn queue(capacity: usize, threshold: u8) -> (Arc<MemoryStore>, QueueManager) {
    let mem = Arc::new(MemoryStore::new());
    let store: SharedStore = mem.clone();
    let q = QueueManager::new(
        store,
        QueueConfig {
            max_pending_size: capacity,
            min_score_threshold: threshold,
            auto_expire_hours: 1,
        },
    );
    (mem, q)
}

#[tokio::test]
async fn full_queue_evicts_lowest_or_rejects() {
    let (mem, q) = queue(2, 0);
    assert!(q.add("c", &scored("forty", 40)).await.unwrap());
    assert!(q.add("c", &scored("sixty", 60)).await.unwrap());

    assert!(q.add("c", &scored("fifty", 50)).await.unwrap());
    let stats = q.stats("c").await.unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.lowest, Some(50));
    assert_eq!(stats.highest, Some(60));
    // the evicted payload is gone too
    let forty = scored("forty", 40);
    assert!(!mem
        .exists(&keys::queue_data("c", forty.content_hash()))
        .await
        .unwrap());

    assert!(!q.add("c", &scored("thirty", 30)).await.unwrap());
    // equal to the minimum is not enough either
    assert!(!q.add("c", &scored("another fifty", 50)).await.unwrap());
    let thirty = scored("thirty", 30);
    assert!(!mem
        .exists(&keys::queue_data("c", thirty.content_hash()))
        .await
        .unwrap());

    let batch = q.get_batch("c", 10, false).await.unwrap();
    let totals: Vec<u8> = batch.iter().map(|s| s.score_total).collect();
    assert_eq!(totals, vec![60, 50]);
}

#[tokio::test]
async fn below_threshold_is_never_stored() {
    let (mem, q) = queue(10, 30);
    assert!(!q.add("c", &scored("meh", 29)).await.unwrap());
    assert!(q.add("c", &scored("ok", 30)).await.unwrap());
    assert_eq!(q.stats("c").await.unwrap().pending, 1);
    // index + one payload
    assert_eq!(mem.len(), 2);
}

#[tokio::test]
async fn equal_scores_dequeue_in_insertion_order() {
    let (_mem, q) = queue(10, 0);
    for title in ["first", "second", "third"] {
        q.add("c", &scored(title, 70)).await.unwrap();
    }
    q.add("c", &scored("top", 90)).await.unwrap();

    let order: Vec<String> = {
        let mut out = Vec::new();
        while let Some(s) = q.get_next("c").await.unwrap() {
            out.push(s.item.title_normalized);
        }
        out
    };
    assert_eq!(order, vec!["top", "first", "second", "third"]);
}

#[tokio::test]
async fn eviction_among_equal_lowest_takes_newest() {
    let (_mem, q) = queue(2, 0);
    q.add("c", &scored("old", 40)).await.unwrap();
    q.add("c", &scored("new", 40)).await.unwrap();
    q.add("c", &scored("better", 55)).await.unwrap();

    let left: Vec<String> = q
        .get_batch("c", 10, false)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.item.title_normalized)
        .collect();
    assert_eq!(left, vec!["better", "old"]);
}

#[tokio::test]
async fn peek_keeps_and_batch_remove_drains() {
    let (_mem, q) = queue(10, 0);
    q.add("c", &scored("a", 80)).await.unwrap();
    q.add("c", &scored("b", 60)).await.unwrap();
    q.add("c", &scored("d", 40)).await.unwrap();

    let peeked = q.peek_next("c").await.unwrap().unwrap();
    assert_eq!(peeked.score_total, 80);
    assert_eq!(q.stats("c").await.unwrap().pending, 3);

    let ranged = q.get_by_score_range("c", 40, 60).await.unwrap();
    let totals: Vec<u8> = ranged.iter().map(|s| s.score_total).collect();
    assert_eq!(totals, vec![60, 40]);

    let drained = q.get_batch("c", 2, true).await.unwrap();
    assert_eq!(drained.len(), 2);
    assert_eq!(q.stats("c").await.unwrap().pending, 1);

    assert!(q.remove("c", scored("d", 40).content_hash()).await.unwrap());
    assert!(!q.remove("c", "missing").await.unwrap());
    assert_eq!(q.stats("c").await.unwrap().pending, 0);
}

#[tokio::test]
async fn consumers_are_isolated() {
    let (_mem, q) = queue(10, 0);
    q.add("alpha", &scored("x", 50)).await.unwrap();
    q.add("beta", &scored("x", 50)).await.unwrap();
    q.add("beta", &scored("y", 50)).await.unwrap();

    assert_eq!(q.consumers().await.unwrap(), vec!["alpha", "beta"]);
    assert_eq!(q.clear("beta").await.unwrap(), 2);
    assert_eq!(q.stats("alpha").await.unwrap().pending, 1);
    assert_eq!(q.consumers().await.unwrap(), vec!["alpha"]);
}

#[tokio::test(start_paused = true)]
async fn expired_payloads_are_skipped_and_cleaned() {
    let (_mem, q) = queue(10, 0);
    q.add("c", &scored("stale", 90)).await.unwrap();
    tokio::time::advance(Duration::from_secs(3601)).await;
    q.add("c", &scored("fresh", 50)).await.unwrap();

    // index still lists the orphan
    assert_eq!(q.stats("c").await.unwrap().pending, 2);
    assert_eq!(q.cleanup_expired("c").await.unwrap(), 1);
    assert_eq!(q.stats("c").await.unwrap().pending, 1);

    q.add("c", &scored("stale again", 95)).await.unwrap();
    tokio::time::advance(Duration::from_secs(3601)).await;
    q.add("c", &scored("newest", 10)).await.unwrap();

    // get_next walks past the orphan to a live item
    let next = q.get_next("c").await.unwrap().unwrap();
    assert_eq!(next.item.title_normalized, "newest");
    assert!(q.get_next("c").await.unwrap().is_none());
}

#[tokio::test]
async fn store_outage_propagates_from_mutations() {
    let (mem, q) = queue(10, 0);
    mem.set_online(false);
    assert!(q.add("c", &scored("x", 50)).await.is_err());
    assert!(q.get_next("c").await.is_err());
    mem.set_online(true);
    assert!(q.add("c", &scored("x", 50)).await.unwrap());
}

#[tokio::test]
async fn unbounded_batch_reads_everything() {
    let (_mem, q) = queue(10, 0);
    q.add("c", &scored("a", 70)).await.unwrap();
    q.add("c", &scored("b", 50)).await.unwrap();

    let peeked = q.get_batch("c", usize::MAX, false).await.unwrap();
    assert_eq!(peeked.len(), 2);
    assert_eq!(q.stats("c").await.unwrap().pending, 2);

    let drained = q.get_batch("c", usize::MAX, true).await.unwrap();
    assert_eq!(drained.len(), 2);
    assert_eq!(q.stats("c").await.unwrap().pending, 0);
    assert!(q.get_batch("c", usize::MAX, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn undecodable_payload_is_dropped_with_its_entry() {
    let (mem, q) = queue(10, 0);
    let data_key = keys::queue_data("c", "garbled");
    mem.set(&data_key, "{not json".into(), None).await.unwrap();
    mem.zadd(&keys::queue("c"), "garbled", 99.0).await.unwrap();
    q.add("c", &scored("fine", 50)).await.unwrap();

    let next = q.get_next("c").await.unwrap().unwrap();
    assert_eq!(next.item.title_normalized, "fine");
    assert!(!mem.exists(&data_key).await.unwrap());
    assert_eq!(q.stats("c").await.unwrap().pending, 0);
}

/// Memory store whose deletes can be switched off.
struct StuckDeletes {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl KvStore for StuckDeletes {
    fn name(&self) -> &'static str {
        "stuck-deletes"
    }
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }
    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delete refused".into()));
        }
        self.inner.delete(keys).await
    }
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.expire(key, ttl).await
    }
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }
    async fn rpush(&self, key: &str, values: Vec<String>) -> StoreResult<u64> {
        self.inner.rpush(key, values).await
    }
    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.lrange_all(key).await
    }
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.inner.zadd(key, member, score).await
    }
    async fn zadd_bounded(
        &self,
        key: &str,
        member: &str,
        score: f64,
        capacity: usize,
    ) -> StoreResult<BoundedInsert> {
        self.inner.zadd_bounded(key, member, score, capacity).await
    }
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.zrem(key, member).await
    }
    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.inner.zcard(key).await
    }
    async fn zrange(
        &self,
        key: &str,
        order: RangeOrder,
        limit: usize,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.inner.zrange(key, order, limit).await
    }
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.inner.zrange_by_score(key, min, max).await
    }
    async fn zpopmax(&self, key: &str, count: usize) -> StoreResult<Vec<ScoredMember>> {
        self.inner.zpopmax(key, count).await
    }
    async fn exec(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        self.inner.exec(ops).await
    }
}

#[tokio::test]
async fn eviction_cleanup_failure_still_admits() {
    let store = Arc::new(StuckDeletes {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(false),
    });
    let shared: SharedStore = store.clone();
    let q = QueueManager::new(
        shared,
        QueueConfig {
            max_pending_size: 1,
            min_score_threshold: 0,
            auto_expire_hours: 1,
        },
    );
    assert!(q.add("c", &scored("low", 40)).await.unwrap());

    store.failing.store(true, Ordering::SeqCst);
    assert!(q.add("c", &scored("high", 60)).await.unwrap());
    store.failing.store(false, Ordering::SeqCst);

    let stats = q.stats("c").await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.highest, Some(60));
}

#[tokio::test]
async fn random_adds_keep_capacity_and_priority() {
    let mut rng = StdRng::seed_from_u64(0x51ce);
    for round in 0..25 {
        let capacity = rng.random_range(1..=5usize);
        let threshold = 20u8;
        let (_mem, q) = queue(capacity, threshold);
        let mut displaced_max: Option<u8> = None;

        for i in 0..40 {
            let score: u8 = rng.random_range(0..=100);
            let before = q.stats("c").await.unwrap();
            let accepted = q
                .add("c", &scored(&format!("r{round} i{i}"), score))
                .await
                .unwrap();
            let after = q.stats("c").await.unwrap();

            assert!(after.pending as usize <= capacity, "round {round} step {i}");
            if !accepted {
                assert_eq!(after, before);
            } else {
                assert!(score >= threshold);
                if (before.pending as usize) < capacity {
                    assert_eq!(after.pending, before.pending + 1);
                }
            }
            if accepted && before.pending as usize == capacity {
                let victim = before.lowest.unwrap();
                assert!(victim < score, "{victim} displaced by {score}");
                displaced_max = displaced_max.max(Some(victim));
            }
            if let (Some(lowest), Some(displaced)) = (after.lowest, displaced_max) {
                assert!(lowest >= displaced, "kept {lowest} after displacing {displaced}");
            }
            if let Some(lowest) = after.lowest {
                assert!(lowest >= threshold);
            }
        }

        let all = q.get_batch("c", usize::MAX, true).await.unwrap();
        assert!(all.len() <= capacity);
        assert!(all.windows(2).all(|w| w[0].score_total >= w[1].score_total));
    }
}
