// src/cluster.rs
//! Groups related items reported by different sources in one run.
//!
//! Two items are related when
//! `keyword_weight * keyword_jaccard + title_weight * title_bigram_jaccard + category_bonus`
//! reaches `similarity_threshold`. The keyword Jaccard is halved when fewer than
//! `min_keyword_overlap` keywords are shared; each shared category adds 0.1 (at most 0.2).
//!
//! Seeds are taken in descending score order and absorb every unclustered item
//! related to them. Clustering only annotates: every input lands in exactly one
//! cluster and nothing is dropped.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::config::ConfigError;
use crate::types::NormalizedItem;

const CATEGORY_STEP: f64 = 0.1;
const CATEGORY_CAP: f64 = 0.2;
const LOW_OVERLAP_PENALTY: f64 = 0.5;

fn default_true() -> bool {
    true
}
fn default_keyword_weight() -> f64 {
    0.6
}
fn default_title_weight() -> f64 {
    0.4
}
fn default_threshold() -> f64 {
    0.3
}
fn default_min_overlap() -> usize {
    2
}

/// `[cluster]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// Off: every item is its own cluster.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_min_overlap")]
    pub min_keyword_overlap: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keyword_weight: default_keyword_weight(),
            title_weight: default_title_weight(),
            similarity_threshold: default_threshold(),
            min_keyword_overlap: default_min_overlap(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, v) in [
            ("cluster.keyword_weight", self.keyword_weight),
            ("cluster.title_weight", self.title_weight),
            ("cluster.similarity_threshold", self.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in [0,1] (got {v})"
                )));
            }
        }
        Ok(())
    }
}

/// One item to cluster, with its provisional score and reporting sources.
#[derive(Debug, Clone, Copy)]
pub struct ClusterInput<'a> {
    pub item: &'a NormalizedItem,
    pub score: u8,
    pub sources: &'a BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicCluster {
    /// Input index of the highest-scored member.
    pub primary: usize,
    /// Other members' input indices, highest score first.
    pub related: Vec<usize>,
    pub sources: BTreeSet<String>,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    pub total_engagement: f64,
    /// Share of the run's sources that reported this topic.
    pub coverage: f64,
}

impl TopicCluster {
    fn seed(index: usize, input: &ClusterInput<'_>) -> Self {
        Self {
            primary: index,
            related: Vec::new(),
            sources: input.sources.clone(),
            keywords: input.item.keywords.clone(),
            categories: input.item.categories.clone(),
            total_engagement: engagement(input.item),
            coverage: 0.0,
        }
    }

    fn absorb(&mut self, index: usize, input: &ClusterInput<'_>) {
        self.related.push(index);
        self.sources.extend(input.sources.iter().cloned());
        for kw in &input.item.keywords {
            if !self.keywords.contains(kw) {
                self.keywords.push(kw.clone());
            }
        }
        for cat in &input.item.categories {
            if !self.categories.contains(cat) {
                self.categories.push(cat.clone());
            }
        }
        self.total_engagement += engagement(input.item);
    }

    pub fn members(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.primary).chain(self.related.iter().copied())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

pub struct TopicClusterer {
    config: ClusterConfig,
}

impl TopicClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Pairwise similarity in [0, 1].
    pub fn similarity(&self, a: &NormalizedItem, b: &NormalizedItem) -> f64 {
        let c = &self.config;
        let kw_a: HashSet<&str> = a.keywords.iter().map(String::as_str).collect();
        let kw_b: HashSet<&str> = b.keywords.iter().map(String::as_str).collect();
        let keyword = if kw_a.is_empty() || kw_b.is_empty() {
            0.0
        } else {
            let shared = kw_a.intersection(&kw_b).count();
            let jaccard = shared as f64 / kw_a.union(&kw_b).count() as f64;
            if shared < c.min_keyword_overlap {
                jaccard * LOW_OVERLAP_PENALTY
            } else {
                jaccard
            }
        };

        let title = title_similarity(&a.title_normalized, &b.title_normalized);

        let cats_a: HashSet<&str> = a.categories.iter().map(String::as_str).collect();
        let shared_cats = b
            .categories
            .iter()
            .filter(|cat| cats_a.contains(cat.as_str()))
            .count();
        let category = (shared_cats as f64 * CATEGORY_STEP).min(CATEGORY_CAP);

        (c.keyword_weight * keyword + c.title_weight * title + category).min(1.0)
    }

    /// Clusters `inputs`, highest-scored cluster first. `total_sources` is the
    /// number of sources that produced items in the run (for coverage).
    pub fn cluster(
        &self,
        inputs: &[ClusterInput<'_>],
        total_sources: usize,
    ) -> Vec<TopicCluster> {
        let mut order: Vec<usize> = (0..inputs.len()).collect();
        order.sort_by(|&a, &b| inputs[b].score.cmp(&inputs[a].score));

        let mut taken = vec![false; inputs.len()];
        let mut clusters = Vec::new();
        for (pos, &seed) in order.iter().enumerate() {
            if taken[seed] {
                continue;
            }
            taken[seed] = true;
            let mut cluster = TopicCluster::seed(seed, &inputs[seed]);
            if self.config.enabled {
                for &other in &order[pos + 1..] {
                    if taken[other] {
                        continue;
                    }
                    let sim = self.similarity(inputs[seed].item, inputs[other].item);
                    if sim >= self.config.similarity_threshold {
                        taken[other] = true;
                        cluster.absorb(other, &inputs[other]);
                    }
                }
            }
            if total_sources > 0 {
                let share = cluster.sources.len() as f64 / total_sources as f64;
                cluster.coverage = share.min(1.0);
            }
            clusters.push(cluster);
        }

        tracing::debug!(
            items = inputs.len(),
            clusters = clusters.len(),
            multi_source = clusters.iter().filter(|c| c.source_count() > 1).count(),
            "topics clustered"
        );
        clusters
    }
}

/// Distinct-source count of each input's cluster, indexed like the inputs.
pub fn source_counts(clusters: &[TopicCluster], inputs: usize) -> Vec<usize> {
    let mut counts = vec![1; inputs];
    for c in clusters {
        for i in c.members() {
            if let Some(slot) = counts.get_mut(i) {
                *slot = c.source_count().max(1);
            }
        }
    }
    counts
}

fn engagement(item: &NormalizedItem) -> f64 {
    let m = |k: &str| item.metrics.get(k).copied().unwrap_or(0.0);
    m("score") + m("upvotes") + (m("views") / 100.0).floor() + m("recommends") + m("comments") * 2.0
}

fn tokenize(title: &str) -> Vec<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"[^\w\s]").unwrap());
    re.replace_all(title, " ")
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Jaccard over word bigrams; titles shorter than two words count as one gram.
fn title_similarity(a: &str, b: &str) -> f64 {
    let wa = tokenize(a);
    let wb = tokenize(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let grams = |w: &[String]| -> HashSet<Vec<String>> {
        if w.len() < 2 {
            HashSet::from([w.to_vec()])
        } else {
            w.windows(2).map(<[String]>::to_vec).collect()
        }
    };
    let ga = grams(&wa);
    let gb = grams(&wb);
    let union = ga.union(&gb).count();
    if union == 0 {
        return 0.0;
    }
    ga.intersection(&gb).count() as f64 / union as f64
}
