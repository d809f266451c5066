// src/sources/mod.rs
pub mod politeness;
pub mod rss;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{RawItem, SourceParams, SourceScope};

pub use politeness::PolitenessLimiter;
pub use rss::RssFeedSource;

/// Uniform "collect raw items" capability of an external source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key (source type).
    fn name(&self) -> &str;
    fn scope(&self) -> SourceScope;
    /// Host used for politeness spacing; `None` skips the limiter.
    fn host(&self) -> Option<&str> {
        None
    }
    async fn collect(&self, params: &SourceParams) -> Result<Vec<RawItem>>;
    async fn health_check(&self) -> bool {
        true
    }
}

pub type DynSource = Arc<dyn SourceAdapter>;

fn default_weight() -> f64 {
    2.5
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
}

/// One entry of the `[[sources]]` config list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: String,
    pub kind: SourceKind,
    pub scope: SourceScope,
    #[serde(default)]
    pub url: Option<String>,
    /// Local file served instead of `url` (offline runs, demos).
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    /// Trust weight 0..=5; credibility = min(10, weight * 2).
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl SourceConfig {
    pub fn credibility(&self) -> f64 {
        (self.weight * 2.0).clamp(0.0, 10.0)
    }
}

#[derive(Clone)]
pub struct RegisteredSource {
    pub adapter: DynSource,
    /// 1..=10, fed to the scorer.
    pub credibility: f64,
}

/// Source types resolved once at startup into typed adapters.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, RegisteredSource>,
    order: Vec<String>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: DynSource, credibility: f64) -> Result<()> {
        let name = adapter.name().to_string();
        anyhow::ensure!(
            !self.sources.contains_key(&name),
            "source type {name} registered twice"
        );
        self.order.push(name.clone());
        self.sources.insert(
            name,
            RegisteredSource {
                adapter,
                credibility,
            },
        );
        Ok(())
    }

    pub fn from_config(configs: &[SourceConfig], http_timeout: Duration) -> Result<Self> {
        let mut reg = Self::new();
        for cfg in configs {
            let adapter: DynSource = match cfg.kind {
                SourceKind::Rss => match (&cfg.fixture, &cfg.url) {
                    (Some(path), _) => {
                        let xml = std::fs::read_to_string(path)
                            .with_context(|| format!("reading fixture {}", path.display()))?;
                        Arc::new(RssFeedSource::from_fixture_str(&cfg.source_type, cfg.scope, &xml))
                    }
                    (None, Some(url)) => Arc::new(RssFeedSource::from_url(
                        &cfg.source_type,
                        cfg.scope,
                        url,
                        http_timeout,
                    )?),
                    (None, None) => {
                        anyhow::bail!("source {} needs either url or fixture", cfg.source_type)
                    }
                },
            };
            reg.register(adapter, cfg.credibility())?;
            tracing::info!(source = %cfg.source_type, scope = ?cfg.scope, "source registered");
        }
        Ok(reg)
    }

    pub fn get(&self, source_type: &str) -> Option<&RegisteredSource> {
        self.sources.get(source_type)
    }

    pub fn contains(&self, source_type: &str) -> bool {
        self.sources.contains_key(source_type)
    }

    /// Registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisteredSource)> {
        self.order
            .iter()
            .filter_map(|n| self.sources.get(n).map(|s| (n.as_str(), s)))
    }

    pub fn global_types(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, s)| s.adapter.scope() == SourceScope::Global)
            .map(|(n, _)| n.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Health of every source, in registration order.
    pub async fn health(&self) -> Vec<(String, bool)> {
        let checks = self.iter().map(|(name, s)| {
            let adapter = s.adapter.clone();
            let name = name.to_string();
            async move { (name, adapter.health_check().await) }
        });
        futures::future::join_all(checks).await
    }
}
