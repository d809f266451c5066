//! In-process [`KvStore`] backend.
//!
//! All state sits behind one `parking_lot::Mutex`; every trait call takes the
//! lock exactly once, which gives the same per-command atomicity a Redis server
//! provides. Expiry is lazy (checked on access) and uses `tokio::time::Instant`
//! so tests can drive TTLs with `tokio::time::pause()` / `advance()`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::time::Instant;

use super::{
    BatchOp, BoundedInsert, KvStore, RangeOrder, ScoredMember, StoreError, StoreResult,
};

#[derive(Debug, Clone)]
struct ZEntry {
    score: f64,
    seq: u64,
    member: String,
}

impl Ord for ZEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            // newer members sort lower among equal scores
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| self.member.cmp(&other.member))
    }
}

impl PartialOrd for ZEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ZEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ZEntry {}

impl From<&ZEntry> for ScoredMember {
    fn from(e: &ZEntry) -> Self {
        ScoredMember {
            member: e.member.clone(),
            score: e.score,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ZSet {
    by_member: HashMap<String, (f64, u64)>,
    ordered: BTreeSet<ZEntry>,
}

impl ZSet {
    /// Returns `true` if the member is new. Re-scoring keeps the original sequence.
    fn insert(&mut self, member: &str, score: f64, seq: u64) -> bool {
        match self.by_member.get(member).copied() {
            Some((old_score, old_seq)) => {
                self.ordered.remove(&ZEntry {
                    score: old_score,
                    seq: old_seq,
                    member: member.to_string(),
                });
                self.ordered.insert(ZEntry {
                    score,
                    seq: old_seq,
                    member: member.to_string(),
                });
                self.by_member.insert(member.to_string(), (score, old_seq));
                false
            }
            None => {
                self.ordered.insert(ZEntry {
                    score,
                    seq,
                    member: member.to_string(),
                });
                self.by_member.insert(member.to_string(), (score, seq));
                true
            }
        }
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.by_member.remove(member) {
            Some((score, seq)) => {
                self.ordered.remove(&ZEntry {
                    score,
                    seq,
                    member: member.to_string(),
                });
                true
            }
            None => false,
        }
    }

    fn contains(&self, member: &str) -> bool {
        self.by_member.contains_key(member)
    }

    fn lowest(&self) -> Option<ScoredMember> {
        self.ordered.iter().next().map(ScoredMember::from)
    }

    fn pop_highest(&mut self) -> Option<ScoredMember> {
        let top = self.ordered.pop_last()?;
        self.by_member.remove(&top.member);
        Some(ScoredMember::from(&top))
    }

    fn len(&self) -> usize {
        self.by_member.len()
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(Vec<String>),
    ZSet(ZSet),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<String, Entry>,
    seq: u64,
}

impl Inner {
    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        let expired = matches!(self.data.get(key), Some(e) if e.is_expired(now));
        if expired {
            self.data.remove(key);
        }
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        self.purge_if_expired(key, now);
        self.data.get_mut(key)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn zset(&mut self, key: &str, now: Instant, create: bool) -> StoreResult<Option<&mut ZSet>> {
        self.purge_if_expired(key, now);
        if create {
            self.data
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::ZSet(ZSet::default())));
        }
        match self.data.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::ZSet(z),
                ..
            }) => Ok(Some(z)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn list(
        &mut self,
        key: &str,
        now: Instant,
        create: bool,
    ) -> StoreResult<Option<&mut Vec<String>>> {
        self.purge_if_expired(key, now);
        if create {
            self.data
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::List(Vec::new())));
        }
        match self.data.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(l),
                ..
            }) => Ok(Some(l)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// Drops a sorted set once its last member is gone (Redis semantics).
    fn drop_if_empty_zset(&mut self, key: &str) {
        let empty = matches!(
            self.data.get(key),
            Some(Entry { value: Value::ZSet(z), .. }) if z.len() == 0
        );
        if empty {
            self.data.remove(key);
        }
    }

    fn set(&mut self, key: &str, value: String, ttl: Option<Duration>, now: Instant) {
        self.data.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at: ttl.map(|t| now + t),
            },
        );
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        match self.live(key, now) {
            Some(e) => {
                e.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64, now: Instant) -> StoreResult<bool> {
        let seq = self.next_seq();
        let set = self
            .zset(key, now, true)?
            .ok_or_else(|| StoreError::WrongType(key.to_string()))?;
        Ok(set.insert(member, score, seq))
    }

    fn zrem(&mut self, key: &str, member: &str, now: Instant) -> StoreResult<bool> {
        let removed = match self.zset(key, now, false)? {
            Some(set) => set.remove(member),
            None => false,
        };
        self.drop_if_empty_zset(key);
        Ok(removed)
    }

    fn rpush(&mut self, key: &str, values: Vec<String>, now: Instant) -> StoreResult<u64> {
        let list = self
            .list(key, now, true)?
            .ok_or_else(|| StoreError::WrongType(key.to_string()))?;
        list.extend(values);
        Ok(list.len() as u64)
    }

    fn apply(&mut self, op: BatchOp, now: Instant) -> StoreResult<()> {
        match op {
            BatchOp::Delete(key) => {
                self.data.remove(&key);
            }
            BatchOp::Set { key, value, ttl } => self.set(&key, value, ttl, now),
            BatchOp::RPush { key, values } => {
                self.rpush(&key, values, now)?;
            }
            BatchOp::Expire { key, ttl } => {
                self.expire(&key, ttl, now);
            }
            BatchOp::ZAdd { key, member, score } => {
                self.zadd(&key, &member, score, now)?;
            }
            BatchOp::ZRem { key, member } => {
                self.zrem(&key, &member, now)?;
            }
        }
        Ok(())
    }
}

fn batch_key(op: &BatchOp) -> &str {
    match op {
        BatchOp::Delete(key)
        | BatchOp::Set { key, .. }
        | BatchOp::RPush { key, .. }
        | BatchOp::Expire { key, .. }
        | BatchOp::ZAdd { key, .. }
        | BatchOp::ZRem { key, .. } => key,
    }
}

/// Single-process store. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    online: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Fault injection: while offline every call fails with [`StoreError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, AtomicOrdering::SeqCst);
    }

    /// Number of live keys (diagnostics/tests).
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner.data.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.online.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store set offline".into()))
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_online()?;
        let now = Instant::now();
        self.inner.lock().set(key, value, ttl, now);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut n = 0;
        for k in keys {
            inner.purge_if_expired(k, now);
            if inner.data.remove(k).is_some() {
                n += 1;
            }
        }
        Ok(n)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self.inner.lock().live(key, now).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self.inner.lock().expire(key, ttl, now))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.data.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = inner
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn rpush(&self, key: &str, values: Vec<String>) -> StoreResult<u64> {
        self.check_online()?;
        let now = Instant::now();
        self.inner.lock().rpush(key, values, now)
    }

    async fn lrange_all(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Ok(inner.list(key, now, false)?.cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        self.inner.lock().zadd(key, member, score, now)
    }

    async fn zadd_bounded(
        &self,
        key: &str,
        member: &str,
        score: f64,
        capacity: usize,
    ) -> StoreResult<BoundedInsert> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let seq = inner.next_seq();
        let set = inner
            .zset(key, now, true)?
            .ok_or_else(|| StoreError::WrongType(key.to_string()))?;

        if set.contains(member) {
            set.insert(member, score, seq);
            return Ok(BoundedInsert::Updated);
        }
        if set.len() < capacity {
            set.insert(member, score, seq);
            return Ok(BoundedInsert::Inserted);
        }
        let outcome = match set.lowest() {
            Some(lowest) if score <= lowest.score => BoundedInsert::Rejected {
                lowest: lowest.score,
            },
            Some(lowest) => {
                set.remove(&lowest.member);
                set.insert(member, score, seq);
                BoundedInsert::Evicted(lowest)
            }
            // capacity == 0
            None => BoundedInsert::Rejected { lowest: f64::MAX },
        };
        inner.drop_if_empty_zset(key);
        Ok(outcome)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_online()?;
        let now = Instant::now();
        self.inner.lock().zrem(key, member, now)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Ok(inner.zset(key, now, false)?.map_or(0, |s| s.len() as u64))
    }

    async fn zrange(
        &self,
        key: &str,
        order: RangeOrder,
        limit: usize,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Some(set) = inner.zset(key, now, false)? else {
            return Ok(Vec::new());
        };
        let out = match order {
            RangeOrder::Ascending => set
                .ordered
                .iter()
                .take(limit)
                .map(ScoredMember::from)
                .collect(),
            RangeOrder::Descending => set
                .ordered
                .iter()
                .rev()
                .take(limit)
                .map(ScoredMember::from)
                .collect(),
        };
        Ok(out)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Some(set) = inner.zset(key, now, false)? else {
            return Ok(Vec::new());
        };
        Ok(set
            .ordered
            .iter()
            .filter(|e| e.score >= min && e.score <= max)
            .map(ScoredMember::from)
            .collect())
    }

    async fn zpopmax(&self, key: &str, count: usize) -> StoreResult<Vec<ScoredMember>> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        if let Some(set) = inner.zset(key, now, false)? {
            while out.len() < count {
                match set.pop_highest() {
                    Some(m) => out.push(m),
                    None => break,
                }
            }
        }
        inner.drop_if_empty_zset(key);
        Ok(out)
    }

    async fn exec(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        self.check_online()?;
        let now = Instant::now();
        let mut inner = self.inner.lock();

        // Snapshot touched keys so a failing op rolls the whole batch back.
        let mut snapshot: Vec<(String, Option<Entry>)> = Vec::new();
        for op in &ops {
            let key = batch_key(op);
            if !snapshot.iter().any(|(k, _)| k == key) {
                inner.purge_if_expired(key, now);
                snapshot.push((key.to_string(), inner.data.get(key).cloned()));
            }
        }

        for op in ops {
            if let Err(e) = inner.apply(op, now) {
                for (key, prev) in snapshot {
                    match prev {
                        Some(entry) => {
                            inner.data.insert(key, entry);
                        }
                        None => {
                            inner.data.remove(&key);
                        }
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}
