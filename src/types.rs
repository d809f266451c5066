// src/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One item exactly as an adapter produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    pub source_id: String,  // adapter-local id (guid, post id, ...)
    pub source_type: String, // registry key, e.g. "hackernews"
    pub source_url: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Numeric signals from the source (upvotes, `normalized_score`, ...).
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RawItem {
    pub fn new(source_type: &str, source_id: &str, title: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            source_type: source_type.to_string(),
            source_url: String::new(),
            title: title.to_string(),
            body: None,
            published_at: None,
            metrics: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedItem {
    pub source_id: String,
    pub source_type: String,
    pub source_url: String,
    pub title: String,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub metrics: BTreeMap<String, f64>,
    pub metadata: BTreeMap<String, String>,

    pub language: String,
    pub title_translated: Option<String>,
    pub title_normalized: String,
    pub summary: String,
    /// Lowercase classifier keywords.
    pub keywords: Vec<String>,
    /// Lowercase classifier categories.
    pub categories: Vec<String>,
    pub entities: BTreeMap<String, Vec<String>>,
    pub content_hash: String,
}

impl NormalizedItem {
    /// Union of keywords and categories, sorted and deduplicated.
    pub fn terms(&self) -> Vec<String> {
        let mut t: Vec<String> = self
            .keywords
            .iter()
            .chain(self.categories.iter())
            .cloned()
            .collect();
        t.sort();
        t.dedup();
        t
    }

    /// All entity names, lowercased.
    pub fn entity_names(&self) -> Vec<String> {
        self.entities
            .values()
            .flatten()
            .map(|e| e.to_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredItem {
    pub item: NormalizedItem,
    pub score_source: f64,
    pub score_freshness: f64,
    pub score_trend: f64,
    pub score_relevance: f64,
    pub score_total: u8,
    #[serde(default)]
    pub series_id: Option<String>,
}

impl ScoredItem {
    pub fn content_hash(&self) -> &str {
        &self.item.content_hash
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceScope {
    /// Same data for every consumer; served from the shared pool.
    Global,
    /// Depends on consumer parameters; served from the scoped cache.
    Scoped,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceOutcome {
    pub source_type: String,
    pub scope: SourceScope,
    pub items: usize,
    pub from_cache: bool,
    pub error: Option<String>,
}

/// Summary of one `collect_for_consumer` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    pub consumer_id: String,
    pub global_items: usize,
    pub scoped_items: usize,
    pub collected: usize,
    pub normalized: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
    pub scored: usize,
    pub enqueued: usize,
    pub rejected_by_queue: usize,
    pub failed: usize,
    /// Topic clusters among the items that reached scoring.
    pub clusters: usize,
    /// Clusters reported by more than one source.
    pub multi_source_clusters: usize,
    pub sources: Vec<SourceOutcome>,
    pub errors: Vec<String>,
}

/// A single collection parameter: scalar or list (e.g. `subreddits = ["rust", "golang"]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ParamValue {
    One(String),
    Many(Vec<String>),
}

/// Adapter parameters, ordered by key so iteration is canonical.
pub type SourceParams = BTreeMap<String, ParamValue>;
