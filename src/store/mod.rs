//! Backing store abstraction.
//!
//! Every shared piece of state in the collector (pool snapshots, scoped caches,
//! dedup marks, priority queues) lives behind [`KvStore`]: a key-value store with
//! TTL, list and sorted-set operations plus atomic multi-op batches. The shape is
//! deliberately Redis-like so a networked backend can be dropped in; the crate
//! ships [`MemoryStore`] for single-process deployments and tests.
//!
//! Sorted-set ordering is total: ascending by score, and among equal scores the
//! most recently inserted member sorts lowest. Consequently `zpopmax` hands out
//! equal-priority members in insertion order and capacity eviction removes the
//! newest of the lowest-priority members.

pub mod keys;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("wrong value type at key `{0}`")]
    WrongType(String),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Member of a sorted set together with its priority.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOrder {
    Ascending,
    Descending,
}

/// Outcome of [`KvStore::zadd_bounded`].
#[derive(Debug, Clone, PartialEq)]
pub enum BoundedInsert {
    /// New member admitted below capacity.
    Inserted,
    /// Member already present; its score was replaced.
    Updated,
    /// Set was full; the returned lowest member was removed to make room.
    Evicted(ScoredMember),
    /// Set was full and the new score did not beat the lowest one.
    Rejected { lowest: f64 },
}

/// One step of an atomic batch (see [`KvStore::exec`]).
#[derive(Debug, Clone)]
pub enum BatchOp {
    Delete(String),
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    RPush {
        key: String,
        values: Vec<String>,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZRem {
        key: String,
        member: String,
    },
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;
    /// Deletes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;
    async fn exists(&self, key: &str) -> StoreResult<bool>;
    /// Sets a TTL on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;
    /// Live (non-expired) keys starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn rpush(&self, key: &str, values: Vec<String>) -> StoreResult<u64>;
    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Adds or re-scores a member. Returns `true` if the member is new.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;
    /// Capacity-aware insert, evaluated atomically.
    async fn zadd_bounded(
        &self,
        key: &str,
        member: &str,
        score: f64,
        capacity: usize,
    ) -> StoreResult<BoundedInsert>;
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;
    async fn zcard(&self, key: &str) -> StoreResult<u64>;
    /// Up to `limit` members in the given order.
    async fn zrange(
        &self,
        key: &str,
        order: RangeOrder,
        limit: usize,
    ) -> StoreResult<Vec<ScoredMember>>;
    /// Members with `min <= score <= max`, ascending.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> StoreResult<Vec<ScoredMember>>;
    /// Atomically removes and returns up to `count` highest members, descending.
    async fn zpopmax(&self, key: &str, count: usize) -> StoreResult<Vec<ScoredMember>>;

    /// Applies all operations atomically: readers observe either none or all of them.
    async fn exec(&self, ops: Vec<BatchOp>) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn KvStore>;
