// src/scoring.rs
//! Multi-factor topic scoring.
//!
//! total = (Σ component·weight + multi_source_bonus + series_bonus) · 100,
//! clamped to [0, 100] and truncated. Every component lies in [0, 1] and the
//! weights are non-negative, so the total is monotone in each component and
//! in both bonuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::ConfigError;
use crate::types::{NormalizedItem, ScoredItem};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
const NEUTRAL: f64 = 0.5;

/// Missing keys keep their default weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub source_credibility: f64,
    pub source_score: f64,
    pub freshness: f64,
    pub trend_momentum: f64,
    pub term_relevance: f64,
    pub entity_relevance: f64,
    pub novelty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            source_credibility: 0.15,
            source_score: 0.15,
            freshness: 0.20,
            trend_momentum: 0.10,
            term_relevance: 0.25,
            entity_relevance: 0.05,
            novelty: 0.10,
        }
    }
}

impl ScoringWeights {
    fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("source_credibility", self.source_credibility),
            ("source_score", self.source_score),
            ("freshness", self.freshness),
            ("trend_momentum", self.trend_momentum),
            ("term_relevance", self.term_relevance),
            ("entity_relevance", self.entity_relevance),
            ("novelty", self.novelty),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.named().iter().map(|(_, w)| w).sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in self.named() {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::WeightRange { name, value: w });
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

/// Bonus by number of distinct sources reporting the same item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MultiSourceBonus {
    pub two: f64,
    pub three: f64,
    pub four_plus: f64,
}

impl Default for MultiSourceBonus {
    fn default() -> Self {
        Self {
            two: 0.1,
            three: 0.2,
            four_plus: 0.3,
        }
    }
}

impl MultiSourceBonus {
    pub fn for_count(&self, sources: u32) -> f64 {
        match sources {
            0 | 1 => 0.0,
            2 => self.two,
            3 => self.three,
            _ => self.four_plus,
        }
    }
}

/// Stepped bonus by historical series performance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeriesBonus {
    pub high_threshold: f64,
    pub high: f64,
    pub medium_threshold: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for SeriesBonus {
    fn default() -> Self {
        Self {
            high_threshold: 0.8,
            high: 0.3,
            medium_threshold: 0.5,
            medium: 0.15,
            low: 0.05,
        }
    }
}

impl SeriesBonus {
    pub fn for_performance(&self, performance: Option<f64>) -> f64 {
        match performance {
            None => 0.0,
            Some(p) if p >= self.high_threshold => self.high,
            Some(p) if p >= self.medium_threshold => self.medium,
            Some(_) => self.low,
        }
    }
}

fn default_half_life() -> f64 {
    24.0
}
fn default_floor() -> f64 {
    0.1
}
fn default_decay_base() -> f64 {
    2.0
}
fn default_credibility() -> f64 {
    5.0
}

/// `[scoring]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default = "default_half_life")]
    pub freshness_half_life_hours: f64,
    #[serde(default = "default_floor")]
    pub freshness_min: f64,
    #[serde(default = "default_decay_base")]
    pub freshness_decay_base: f64,
    #[serde(default = "default_credibility")]
    pub default_credibility: f64,
    #[serde(default)]
    pub multi_source_bonus: MultiSourceBonus,
    #[serde(default)]
    pub series_bonus: SeriesBonus,
    /// Channel targets for term relevance (lowercased at load).
    #[serde(default)]
    pub target_terms: Vec<String>,
    #[serde(default)]
    pub target_entities: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            freshness_half_life_hours: default_half_life(),
            freshness_min: default_floor(),
            freshness_decay_base: default_decay_base(),
            default_credibility: default_credibility(),
            multi_source_bonus: MultiSourceBonus::default(),
            series_bonus: SeriesBonus::default(),
            target_terms: Vec::new(),
            target_entities: Vec::new(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        if !(self.freshness_half_life_hours > 0.0) {
            return Err(ConfigError::Freshness(format!(
                "half-life must be > 0 (got {})",
                self.freshness_half_life_hours
            )));
        }
        if !(0.0..=1.0).contains(&self.freshness_min) {
            return Err(ConfigError::Freshness(format!(
                "floor must be in [0,1] (got {})",
                self.freshness_min
            )));
        }
        if !(self.freshness_decay_base > 1.0) {
            return Err(ConfigError::Freshness(format!(
                "decay base must be > 1 (got {})",
                self.freshness_decay_base
            )));
        }
        let b = &self.multi_source_bonus;
        let s = &self.series_bonus;
        if [b.two, b.three, b.four_plus, s.high, s.medium, s.low]
            .iter()
            .any(|v| *v < 0.0)
        {
            return Err(ConfigError::Invalid("bonuses must be non-negative".into()));
        }
        Ok(())
    }
}

/// Per-item inputs that do not live on the item itself.
#[derive(Debug, Clone, Default)]
pub struct ScoreContext {
    /// 1..=10; `None` uses the configured default.
    pub source_credibility: Option<f64>,
    /// term -> momentum in [0, 1]
    pub trend_momentum: HashMap<String, f64>,
    /// Terms of recently used topics (novelty baseline).
    pub recent_terms: HashSet<String>,
    /// Performance of the matched series, if any.
    pub series_performance: Option<f64>,
    /// Distinct sources that reported this item in the current run.
    pub source_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreComponents {
    pub source_credibility: f64,
    pub source_score: f64,
    pub freshness: f64,
    pub trend_momentum: f64,
    pub term_relevance: f64,
    pub entity_relevance: f64,
    pub novelty: f64,
    pub multi_source_bonus: f64,
    pub series_bonus: f64,
}

pub struct Scorer {
    config: ScoringConfig,
    target_terms: HashSet<String>,
    target_entities: HashSet<String>,
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        let target_terms = config.target_terms.iter().map(|t| t.to_lowercase()).collect();
        let target_entities = config
            .target_entities
            .iter()
            .map(|t| t.to_lowercase())
            .collect();
        Self {
            config,
            target_terms,
            target_entities,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, item: NormalizedItem, ctx: &ScoreContext) -> ScoredItem {
        self.score_at(item, ctx, Utc::now())
    }

    /// Same as [`Scorer::score`] with an explicit clock.
    pub fn score_at(
        &self,
        item: NormalizedItem,
        ctx: &ScoreContext,
        now: DateTime<Utc>,
    ) -> ScoredItem {
        let c = self.components(&item, ctx, now);
        let total = self.total(&c);
        let relevance = (c.term_relevance + c.entity_relevance) / 2.0;

        tracing::debug!(
            title = %item.title_normalized,
            total,
            freshness = c.freshness,
            relevance,
            trend = c.trend_momentum,
            "item scored"
        );

        ScoredItem {
            item,
            score_source: c.source_score,
            score_freshness: c.freshness,
            score_trend: c.trend_momentum,
            score_relevance: relevance,
            score_total: total as u8,
            series_id: None,
        }
    }

    /// Total score without building a [`ScoredItem`].
    pub fn total_for(&self, item: &NormalizedItem, ctx: &ScoreContext) -> u8 {
        self.total(&self.components(item, ctx, Utc::now())) as u8
    }

    fn total(&self, c: &ScoreComponents) -> f64 {
        let w = &self.config.weights;
        let weighted = c.source_credibility * w.source_credibility
            + c.source_score * w.source_score
            + c.freshness * w.freshness
            + c.trend_momentum * w.trend_momentum
            + c.term_relevance * w.term_relevance
            + c.entity_relevance * w.entity_relevance
            + c.novelty * w.novelty;
        // epsilon keeps e.g. 0.42 from truncating to 41
        ((weighted + c.multi_source_bonus + c.series_bonus) * 100.0 + 1e-9).clamp(0.0, 100.0)
    }

    pub fn components(
        &self,
        item: &NormalizedItem,
        ctx: &ScoreContext,
        now: DateTime<Utc>,
    ) -> ScoreComponents {
        let terms: HashSet<String> = item.terms().into_iter().collect();
        ScoreComponents {
            source_credibility: clamp01(
                ctx.source_credibility
                    .unwrap_or(self.config.default_credibility)
                    / 10.0,
            ),
            source_score: item
                .metrics
                .get("normalized_score")
                .map(|v| clamp01(*v))
                .unwrap_or(NEUTRAL),
            freshness: self.freshness(item.published_at, now),
            trend_momentum: trend(&terms, &ctx.trend_momentum),
            term_relevance: jaccard(&terms, &self.target_terms),
            entity_relevance: jaccard(
                &item.entity_names().into_iter().collect(),
                &self.target_entities,
            ),
            novelty: novelty(&terms, &ctx.recent_terms),
            multi_source_bonus: self.config.multi_source_bonus.for_count(ctx.source_count),
            series_bonus: self
                .config
                .series_bonus
                .for_performance(ctx.series_performance),
        }
    }

    /// `max(floor, base^(-age_h / half_life))`; 1.0 for zero/negative age,
    /// floor when the publish time is unknown.
    pub fn freshness(&self, published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let floor = self.config.freshness_min;
        let Some(published) = published_at else {
            return floor;
        };
        let age_hours = (now - published).num_milliseconds() as f64 / 3_600_000.0;
        if age_hours <= 0.0 {
            return 1.0;
        }
        let decay = self
            .config
            .freshness_decay_base
            .powf(-age_hours / self.config.freshness_half_life_hours);
        clamp01(decay.max(floor))
    }
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}

fn trend(terms: &HashSet<String>, momentum: &HashMap<String, f64>) -> f64 {
    let hits: Vec<f64> = terms
        .iter()
        .filter_map(|t| momentum.get(t))
        .map(|v| clamp01(*v))
        .collect();
    if hits.is_empty() {
        0.0
    } else {
        hits.iter().sum::<f64>() / hits.len() as f64
    }
}

/// Jaccard overlap; neutral when either side is empty.
fn jaccard(items: &HashSet<String>, targets: &HashSet<String>) -> f64 {
    if items.is_empty() || targets.is_empty() {
        return NEUTRAL;
    }
    let inter = items.intersection(targets).count();
    let union = items.union(targets).count();
    inter as f64 / union as f64
}

fn novelty(terms: &HashSet<String>, recent: &HashSet<String>) -> f64 {
    if terms.is_empty() {
        return NEUTRAL;
    }
    if recent.is_empty() {
        return 1.0;
    }
    let overlap = terms.iter().filter(|t| recent.contains(*t)).count();
    1.0 - overlap as f64 / terms.len() as f64
}
