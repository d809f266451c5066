// src/queue.rs
//! Bounded per-consumer priority queue.
//!
//! Two keys per entry: the priority index `queue:{consumer}` (sorted set,
//! member = content hash, score = total score) and the payload
//! `queue_data:{consumer}:{hash}` (JSON [`ScoredItem`] with its own TTL).
//! Payloads may expire while the index entry remains; such orphans are
//! skipped on read and removed by [`QueueManager::cleanup_expired`].
//!
//! Equal priorities are served in insertion order, and at capacity the most
//! recently inserted of the lowest-priority entries is evicted first.

use anyhow::{Context, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;
use crate::store::{keys, BoundedInsert, RangeOrder, SharedStore};
use crate::types::ScoredItem;

fn default_max_pending() -> usize {
    100
}
fn default_min_score() -> u8 {
    30
}
fn default_expire_hours() -> u64 {
    72
}

/// `[queue]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_pending")]
    pub max_pending_size: usize,
    #[serde(default = "default_min_score")]
    pub min_score_threshold: u8,
    #[serde(default = "default_expire_hours")]
    pub auto_expire_hours: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending_size: default_max_pending(),
            min_score_threshold: default_min_score(),
            auto_expire_hours: default_expire_hours(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_size == 0 {
            return Err(ConfigError::QueueCapacity);
        }
        if self.min_score_threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "queue.min_score_threshold must be <= 100 (got {})",
                self.min_score_threshold
            )));
        }
        if self.auto_expire_hours == 0 {
            return Err(ConfigError::ZeroTtl("queue.auto_expire_hours"));
        }
        Ok(())
    }

    pub fn payload_ttl(&self) -> Duration {
        Duration::from_secs(self.auto_expire_hours * 3600)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub consumer_id: String,
    pub pending: u64,
    pub highest: Option<u8>,
    pub lowest: Option<u8>,
}

pub struct QueueManager {
    store: SharedStore,
    config: QueueConfig,
}

impl QueueManager {
    pub fn new(store: SharedStore, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueues `item`. `Ok(false)` when it scored below the threshold or did
    /// not beat the current minimum of a full queue.
    pub async fn add(&self, consumer_id: &str, item: &ScoredItem) -> Result<bool> {
        let hash = item.content_hash();
        if item.score_total < self.config.min_score_threshold {
            tracing::debug!(
                consumer = %consumer_id,
                score = item.score_total,
                threshold = self.config.min_score_threshold,
                "below queue threshold"
            );
            return Ok(false);
        }

        let queue_key = keys::queue(consumer_id);
        let data_key = keys::queue_data(consumer_id, hash);
        let payload = serde_json::to_string(item).context("encoding queue payload")?;

        // Payload first: a reader that sees the index entry must find its payload.
        self.store
            .set(&data_key, payload, Some(self.config.payload_ttl()))
            .await
            .with_context(|| format!("writing {data_key}"))?;

        let outcome = match self
            .store
            .zadd_bounded(
                &queue_key,
                hash,
                f64::from(item.score_total),
                self.config.max_pending_size,
            )
            .await
        {
            Ok(o) => o,
            Err(e) => {
                let _ = self.store.delete(&[data_key]).await;
                return Err(e).with_context(|| format!("indexing into {queue_key}"));
            }
        };

        match outcome {
            BoundedInsert::Inserted | BoundedInsert::Updated => {
                tracing::info!(
                    consumer = %consumer_id,
                    hash = %hash,
                    score = item.score_total,
                    "item enqueued"
                );
                Ok(true)
            }
            BoundedInsert::Evicted(victim) => {
                // The new entry is already admitted; a leftover payload only lives out its TTL.
                let victim_key = keys::queue_data(consumer_id, &victim.member);
                if let Err(e) = self.store.delete(&[victim_key.clone()]).await {
                    tracing::warn!(error = ?e, %victim_key, "could not delete evicted payload");
                }
                counter!("queue_evictions_total").increment(1);
                tracing::debug!(
                    consumer = %consumer_id,
                    evicted = %victim.member,
                    evicted_score = victim.score,
                    score = item.score_total,
                    "evicted lowest entry"
                );
                Ok(true)
            }
            BoundedInsert::Rejected { lowest } => {
                self.store
                    .delete(&[data_key])
                    .await
                    .context("dropping rejected payload")?;
                tracing::debug!(
                    consumer = %consumer_id,
                    score = item.score_total,
                    lowest_in_queue = lowest,
                    "queue full, score not high enough"
                );
                Ok(false)
            }
        }
    }

    async fn load(&self, consumer_id: &str, hash: &str) -> Result<Option<ScoredItem>> {
        let data_key = keys::queue_data(consumer_id, hash);
        let Some(raw) = self.store.get(&data_key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                tracing::warn!(error = ?e, %data_key, "undecodable queue payload, dropping it");
                self.store.delete(&[data_key]).await?;
                Ok(None)
            }
        }
    }

    /// Pops the highest-priority live item. Orphans are discarded on the way.
    pub async fn get_next(&self, consumer_id: &str) -> Result<Option<ScoredItem>> {
        let queue_key = keys::queue(consumer_id);
        loop {
            let popped = self.store.zpopmax(&queue_key, 1).await?;
            let Some(top) = popped.into_iter().next() else {
                return Ok(None);
            };
            match self.load(consumer_id, &top.member).await? {
                Some(item) => {
                    self.store
                        .delete(&[keys::queue_data(consumer_id, &top.member)])
                        .await?;
                    tracing::info!(
                        consumer = %consumer_id,
                        hash = %top.member,
                        score = item.score_total,
                        "item dequeued"
                    );
                    return Ok(Some(item));
                }
                None => {
                    counter!("queue_orphans_removed_total").increment(1);
                    tracing::warn!(
                        consumer = %consumer_id,
                        hash = %top.member,
                        "payload missing or unreadable, skipping"
                    );
                }
            }
        }
    }

    /// Highest-priority live item, without removing anything.
    pub async fn peek_next(&self, consumer_id: &str) -> Result<Option<ScoredItem>> {
        Ok(self.get_batch(consumer_id, 1, false).await?.into_iter().next())
    }

    /// Up to `count` live items in descending priority. With `remove`, the
    /// returned items (and any orphans met) leave the queue.
    pub async fn get_batch(
        &self,
        consumer_id: &str,
        count: usize,
        remove: bool,
    ) -> Result<Vec<ScoredItem>> {
        let mut out = Vec::new();
        if remove {
            while out.len() < count {
                match self.get_next(consumer_id).await? {
                    Some(item) => out.push(item),
                    None => break,
                }
            }
            return Ok(out);
        }

        let members = self
            .store
            .zrange(&keys::queue(consumer_id), RangeOrder::Descending, usize::MAX)
            .await?;
        for m in members {
            if out.len() >= count {
                break;
            }
            if let Some(item) = self.load(consumer_id, &m.member).await? {
                out.push(item);
            }
        }
        Ok(out)
    }

    /// Live items with `min <= score <= max`, descending.
    pub async fn get_by_score_range(
        &self,
        consumer_id: &str,
        min: u8,
        max: u8,
    ) -> Result<Vec<ScoredItem>> {
        let members = self
            .store
            .zrange_by_score(&keys::queue(consumer_id), f64::from(min), f64::from(max))
            .await?;
        let mut out = Vec::with_capacity(members.len());
        for m in members.into_iter().rev() {
            if let Some(item) = self.load(consumer_id, &m.member).await? {
                out.push(item);
            }
        }
        Ok(out)
    }

    pub async fn remove(&self, consumer_id: &str, content_hash: &str) -> Result<bool> {
        let removed = self
            .store
            .zrem(&keys::queue(consumer_id), content_hash)
            .await?;
        if removed {
            self.store
                .delete(&[keys::queue_data(consumer_id, content_hash)])
                .await?;
            tracing::debug!(
                consumer = %consumer_id,
                hash = %content_hash,
                "item removed from queue"
            );
        }
        Ok(removed)
    }

    pub async fn stats(&self, consumer_id: &str) -> Result<QueueStats> {
        let queue_key = keys::queue(consumer_id);
        let pending = self.store.zcard(&queue_key).await?;
        let mut stats = QueueStats {
            consumer_id: consumer_id.to_string(),
            pending,
            highest: None,
            lowest: None,
        };
        if pending > 0 {
            let top = self.store.zrange(&queue_key, RangeOrder::Descending, 1).await?;
            let bottom = self.store.zrange(&queue_key, RangeOrder::Ascending, 1).await?;
            stats.highest = top.first().map(|m| m.score as u8);
            stats.lowest = bottom.first().map(|m| m.score as u8);
        }
        Ok(stats)
    }

    /// Drops every entry and payload. Returns the number of index entries removed.
    pub async fn clear(&self, consumer_id: &str) -> Result<u64> {
        let queue_key = keys::queue(consumer_id);
        let members = self
            .store
            .zrange(&queue_key, RangeOrder::Ascending, usize::MAX)
            .await?;
        let mut doomed: Vec<String> = members
            .iter()
            .map(|m| keys::queue_data(consumer_id, &m.member))
            .collect();
        doomed.push(queue_key);
        self.store.delete(&doomed).await?;
        tracing::info!(consumer = %consumer_id, removed = members.len(), "queue cleared");
        Ok(members.len() as u64)
    }

    /// Removes index entries whose payload already expired.
    pub async fn cleanup_expired(&self, consumer_id: &str) -> Result<u64> {
        let queue_key = keys::queue(consumer_id);
        let members = self
            .store
            .zrange(&queue_key, RangeOrder::Ascending, usize::MAX)
            .await?;
        let mut removed = 0u64;
        for m in members {
            let alive = self
                .store
                .exists(&keys::queue_data(consumer_id, &m.member))
                .await?;
            if !alive && self.store.zrem(&queue_key, &m.member).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            counter!("queue_orphans_removed_total").increment(removed);
            tracing::info!(consumer = %consumer_id, removed, "cleaned up expired queue entries");
        }
        Ok(removed)
    }

    /// Consumers that currently have a queue index.
    pub async fn consumers(&self) -> Result<Vec<String>> {
        let keys = self.store.keys_with_prefix(keys::QUEUE_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(keys::QUEUE_PREFIX).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(QueueConfig::default().validate().is_ok());
        let zero = QueueConfig {
            max_pending_size: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::QueueCapacity)));
        assert_eq!(
            QueueConfig::default().payload_ttl(),
            Duration::from_secs(72 * 3600)
        );
    }
}
