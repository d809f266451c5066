// src/pool.rs
//! Two-tier collection cache.
//!
//! * [`GlobalPool`]: one shared snapshot per global source type, replaced
//!   wholesale on every refresh.
//! * [`ScopedCache`]: results of parameterized sources keyed by a canonical
//!   parameter signature, filled through [`ScopedCache::get_or_collect`].
//!
//! Concurrent misses on the same scoped key may both run their collector and
//! the later write wins. Collection is idempotent, so this is accepted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::config::ConfigError;
use crate::store::{keys, BatchOp, SharedStore};
use crate::types::{ParamValue, RawItem, SourceParams};

fn default_global_ttl_secs() -> u64 {
    4 * 3600
}
fn default_scoped_ttl_secs() -> u64 {
    30 * 60
}

/// `[pool]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_global_ttl_secs")]
    pub global_ttl_secs: u64,
    #[serde(default = "default_scoped_ttl_secs")]
    pub scoped_ttl_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            global_ttl_secs: default_global_ttl_secs(),
            scoped_ttl_secs: default_scoped_ttl_secs(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl("pool.global_ttl_secs"));
        }
        if self.scoped_ttl_secs == 0 {
            return Err(ConfigError::ZeroTtl("pool.scoped_ttl_secs"));
        }
        Ok(())
    }
}

/// Written next to each snapshot at `pool:{type}:meta`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolMetadata {
    pub collected_at: DateTime<Utc>,
    pub count: usize,
    pub source_type: String,
}

pub struct GlobalPool {
    store: SharedStore,
    global_types: HashSet<String>,
    default_ttl: Duration,
}

impl GlobalPool {
    pub fn new<I, S>(store: SharedStore, global_types: I, config: &PoolConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            global_types: global_types.into_iter().map(Into::into).collect(),
            default_ttl: Duration::from_secs(config.global_ttl_secs),
        }
    }

    pub fn is_global(&self, source_type: &str) -> bool {
        self.global_types.contains(source_type)
    }

    /// Replaces the snapshot for `source_type` in one atomic batch.
    /// Returns the number of items stored (0 for non-global types).
    pub async fn add(
        &self,
        source_type: &str,
        items: &[RawItem],
        ttl: Option<Duration>,
    ) -> Result<usize> {
        if !self.is_global(source_type) {
            tracing::warn!(source = %source_type, "refusing to pool a non-global source");
            return Ok(0);
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = keys::pool(source_type);
        let meta = PoolMetadata {
            collected_at: Utc::now(),
            count: items.len(),
            source_type: source_type.to_string(),
        };

        let mut ops = vec![BatchOp::Delete(key.clone())];
        if !items.is_empty() {
            let values = items
                .iter()
                .map(serde_json::to_string)
                .collect::<Result<Vec<_>, _>>()
                .context("encoding pool items")?;
            ops.push(BatchOp::RPush {
                key: key.clone(),
                values,
            });
            ops.push(BatchOp::Expire { key, ttl });
        }
        ops.push(BatchOp::Set {
            key: keys::pool_meta(source_type),
            value: serde_json::to_string(&meta).context("encoding pool meta")?,
            ttl: Some(ttl),
        });

        self.store
            .exec(ops)
            .await
            .with_context(|| format!("replacing pool snapshot for {source_type}"))?;
        tracing::info!(
            source = %source_type,
            count = items.len(),
            ttl_secs = ttl.as_secs(),
            "pool refreshed"
        );
        Ok(items.len())
    }

    /// Empty when absent, expired or on store failure; callers treat empty as "needs refresh".
    pub async fn get(&self, source_type: &str) -> Vec<RawItem> {
        let raw = match self.store.lrange_all(&keys::pool(source_type)).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, source = %source_type, "pool read failed");
                return Vec::new();
            }
        };
        raw.iter()
            .filter_map(|s| match serde_json::from_str::<RawItem>(s) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        source = %source_type,
                        "skipping undecodable pool item"
                    );
                    None
                }
            })
            .collect()
    }

    pub async fn is_fresh(&self, source_type: &str) -> bool {
        self.store
            .exists(&keys::pool(source_type))
            .await
            .unwrap_or(false)
    }

    pub async fn metadata(&self, source_type: &str) -> Option<PoolMetadata> {
        let raw = self
            .store
            .get(&keys::pool_meta(source_type))
            .await
            .ok()
            .flatten()?;
        serde_json::from_str(&raw).ok()
    }

    /// Source types that currently have a snapshot.
    pub async fn source_types(&self) -> Result<Vec<String>> {
        let keys = self.store.keys_with_prefix(keys::POOL_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter(|k| !k.ends_with(keys::META_SUFFIX))
            .filter_map(|k| k.strip_prefix(keys::POOL_PREFIX).map(str::to_string))
            .collect())
    }

    /// Clears one source type, or the whole pool. Returns deleted key count.
    pub async fn clear(&self, source_type: Option<&str>) -> Result<u64> {
        let keys = match source_type {
            Some(t) => vec![keys::pool(t), keys::pool_meta(t)],
            None => self.store.keys_with_prefix(keys::POOL_PREFIX).await?,
        };
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.store.delete(&keys).await?)
    }
}

/// Canonical `k=v|k=v` form; keys sorted, list values sorted and comma-joined.
pub fn signature(params: &SourceParams) -> String {
    params
        .iter()
        .map(|(k, v)| match v {
            ParamValue::One(s) => format!("{k}={s}"),
            ParamValue::Many(list) => {
                let mut sorted: Vec<&str> = list.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                format!("{k}={}", sorted.join(","))
            }
        })
        .collect::<Vec<_>>()
        .join("|")
}

pub struct ScopedCache {
    store: SharedStore,
    ttl: Duration,
}

impl ScopedCache {
    pub fn new(store: SharedStore, config: &PoolConfig) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(config.scoped_ttl_secs),
        }
    }

    fn key(source_type: &str, params: &SourceParams) -> String {
        keys::scoped(source_type, &signature(params))
    }

    /// `None` on miss, decode failure or store failure.
    pub async fn get(&self, source_type: &str, params: &SourceParams) -> Option<Vec<RawItem>> {
        let key = Self::key(source_type, params);
        let raw = match self.store.get(&key).await {
            Ok(v) => v?,
            Err(e) => {
                tracing::warn!(error = ?e, %key, "scoped cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<Vec<RawItem>>(&raw) {
            Ok(items) => {
                tracing::debug!(%key, count = items.len(), "scoped cache hit");
                Some(items)
            }
            Err(e) => {
                tracing::warn!(error = ?e, %key, "undecodable scoped cache entry");
                None
            }
        }
    }

    pub async fn set(
        &self,
        source_type: &str,
        params: &SourceParams,
        items: &[RawItem],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = Self::key(source_type, params);
        let value = serde_json::to_string(items).context("encoding scoped items")?;
        self.store
            .set(&key, value, Some(ttl.unwrap_or(self.ttl)))
            .await
            .with_context(|| format!("writing {key}"))
    }

    /// Cached items, or the collector's output written through on a miss.
    /// The flag is `true` when served from cache. A failed write-through is
    /// logged; the collected items are still returned.
    pub async fn get_or_collect<F, Fut>(
        &self,
        source_type: &str,
        params: &SourceParams,
        collector: F,
    ) -> Result<(Vec<RawItem>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RawItem>>>,
    {
        if let Some(hit) = self.get(source_type, params).await {
            return Ok((hit, true));
        }
        let items = collector().await?;
        if let Err(e) = self.set(source_type, params, &items, None).await {
            tracing::warn!(error = ?e, source = %source_type, "scoped cache write-through failed");
        }
        Ok((items, false))
    }

    pub async fn invalidate(&self, source_type: &str, params: &SourceParams) -> Result<bool> {
        let n = self
            .store
            .delete(&[Self::key(source_type, params)])
            .await?;
        Ok(n > 0)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let keys = self.store.keys_with_prefix(keys::SCOPED_PREFIX).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        Ok(self.store.delete(&keys).await?)
    }
}
