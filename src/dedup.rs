// src/dedup.rs
//! Per-consumer exact-hash dedup with TTL.
//!
//! A hash is "seen" while `dedup:{consumer}:{hash}` exists. Expiry is the only
//! way a hash is forgotten (besides an explicit [`Deduplicator::forget`]).
//! Near-duplicates are intentionally not detected: two sources reporting the
//! same event with different wording are both kept.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;
use crate::store::{keys, SharedStore};
use crate::types::NormalizedItem;

pub const DEDUP_TTL_DAYS_MIN: u32 = 1;
pub const DEDUP_TTL_DAYS_MAX: u32 = 30;

fn default_ttl_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_ttl_days(),
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(DEDUP_TTL_DAYS_MIN..=DEDUP_TTL_DAYS_MAX).contains(&self.ttl_days) {
            return Err(ConfigError::DedupTtl(self.ttl_days));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_days) * 86_400)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupReason {
    ExactHash,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DedupOutcome {
    pub is_duplicate: bool,
    pub reason: Option<DedupReason>,
    /// Content hash of the earlier item.
    pub duplicate_of: Option<String>,
}

impl DedupOutcome {
    fn unique() -> Self {
        Self {
            is_duplicate: false,
            reason: None,
            duplicate_of: None,
        }
    }
}

pub struct Deduplicator {
    store: SharedStore,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(store: SharedStore, config: &DedupConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read-only. A store failure is logged and reported as "not a duplicate".
    pub async fn is_duplicate(&self, item: &NormalizedItem, consumer_id: &str) -> DedupOutcome {
        let key = keys::dedup(consumer_id, &item.content_hash);
        match self.store.exists(&key).await {
            Ok(true) => {
                tracing::debug!(
                    consumer = %consumer_id,
                    hash = %item.content_hash,
                    "exact duplicate"
                );
                DedupOutcome {
                    is_duplicate: true,
                    reason: Some(DedupReason::ExactHash),
                    duplicate_of: Some(item.content_hash.clone()),
                }
            }
            Ok(false) => DedupOutcome::unique(),
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    consumer = %consumer_id,
                    "dedup check failed, treating as new"
                );
                DedupOutcome::unique()
            }
        }
    }

    pub async fn mark_seen(&self, item: &NormalizedItem, consumer_id: &str) -> Result<()> {
        let key = keys::dedup(consumer_id, &item.content_hash);
        self.store
            .set(&key, item.title_normalized.clone(), Some(self.ttl))
            .await
            .with_context(|| format!("marking {key} seen"))
    }

    /// Drops a seen-mark. Returns whether one existed.
    pub async fn forget(&self, item: &NormalizedItem, consumer_id: &str) -> Result<bool> {
        let key = keys::dedup(consumer_id, &item.content_hash);
        let n = self
            .store
            .delete(&[key.clone()])
            .await
            .with_context(|| format!("forgetting {key}"))?;
        Ok(n > 0)
    }
}
