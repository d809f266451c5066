// src/config/mod.rs
//! Application config: one TOML (or JSON) document with a section per component.
//!
//! Lookup order for [`AppConfig::load_default`]:
//! 1) `$COLLECTOR_CONFIG_PATH`
//! 2) `config/collector.toml`
//! 3) `config/collector.json`
//! 4) built-in defaults
//!
//! `COLLECTOR_MIN_SCORE` and `COLLECTOR_MAX_PENDING` override the queue section.

pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cluster::ClusterConfig;
use crate::dedup::DedupConfig;
use crate::filter::FilterRule;
use crate::orchestrator::{CollectorConfig, ConsumerPlan};
use crate::pool::PoolConfig;
use crate::queue::QueueConfig;
use crate::scoring::ScoringConfig;
use crate::series::SeriesMatcherConfig;
use crate::sources::SourceConfig;

pub use ai::AiConfig;

const ENV_PATH: &str = "COLLECTOR_CONFIG_PATH";
const ENV_MIN_SCORE: &str = "COLLECTOR_MIN_SCORE";
const ENV_MAX_PENDING: &str = "COLLECTOR_MAX_PENDING";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("scoring weight {name} = {value} is outside [0, 1]")]
    WeightRange { name: &'static str, value: f64 },
    #[error("scoring weights sum to {0}, expected 1.0")]
    WeightSum(f64),
    #[error("freshness: {0}")]
    Freshness(String),
    #[error("dedup ttl_days = {0} is outside [1, 30]")]
    DedupTtl(u32),
    #[error("queue max_pending_size must be > 0")]
    QueueCapacity,
    #[error("series {id}: min_similarity {value} is outside [0, 1]")]
    SeriesSimilarity { id: String, value: f64 },
    #[error("{0} must be > 0")]
    ZeroTtl(&'static str),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub filter: FilterRule,
    #[serde(default)]
    pub series: SeriesMatcherConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub consumers: Vec<ConsumerPlan>,
}

impl AppConfig {
    /// Parses, applies env overrides, resolves secrets and validates.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = Self::parse(&content, &ext)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.finish()
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        for candidate in ["config/collector.toml", "config/collector.json"] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        tracing::info!("no config file found, using defaults");
        Self::default().finish()
    }

    fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        match hint_ext {
            "json" => serde_json::from_str(s).context("invalid JSON config"),
            "toml" => toml::from_str(s).context("invalid TOML config"),
            _ => toml::from_str(s)
                .or_else(|_| serde_json::from_str(s))
                .map_err(|_| anyhow!("unsupported config format")),
        }
    }

    fn finish(mut self) -> Result<Self> {
        self.apply_env_overrides()?;
        self.ai.resolve().context("resolving [ai] section")?;
        self.filter = self.filter.lowercased();
        self.validate()?;
        Ok(self)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_MIN_SCORE) {
            self.queue.min_score_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MIN_SCORE}={v} is not a score"))?;
        }
        if let Ok(v) = std::env::var(ENV_MAX_PENDING) {
            self.queue.max_pending_size = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_PENDING}={v} is not a size"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.queue.validate()?;
        self.dedup.validate()?;
        self.series.validate()?;
        self.cluster.validate()?;
        self.pool.validate()?;
        self.collector.validate()?;

        let weights = self
            .filter
            .include_categories
            .iter()
            .map(|c| (c.name.as_str(), c.weight))
            .chain(
                self.filter
                    .include_keywords
                    .iter()
                    .map(|k| (k.keyword.as_str(), k.weight)),
            );
        for (term, w) in weights {
            if !(0.0..=3.0).contains(&w) {
                return Err(ConfigError::Invalid(format!(
                    "filter term {term}: weight {w} is outside [0, 3]"
                )));
            }
        }

        let mut types = HashSet::new();
        for s in &self.sources {
            if !types.insert(s.source_type.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "source type {} declared twice",
                    s.source_type
                )));
            }
            if !(0.0..=5.0).contains(&s.weight) {
                return Err(ConfigError::Invalid(format!(
                    "source {}: weight {} is outside [0, 5]",
                    s.source_type, s.weight
                )));
            }
        }

        let mut consumers = HashSet::new();
        for plan in &self.consumers {
            if !consumers.insert(plan.consumer_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "consumer {} declared twice",
                    plan.consumer_id
                )));
            }
            if plan.max_items == 0 {
                return Err(ConfigError::Invalid(format!(
                    "consumer {}: max_items must be > 0",
                    plan.consumer_id
                )));
            }
            if let Some(missing) = plan
                .sources
                .iter()
                .find(|ps| !types.contains(ps.source_type.as_str()))
            {
                return Err(ConfigError::Invalid(format!(
                    "consumer {} references unknown source {}",
                    plan.consumer_id, missing.source_type
                )));
            }
        }
        Ok(())
    }
}
