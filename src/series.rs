// src/series.rs
//! Term-overlap matching of items against configured content series.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::config::ConfigError;
use crate::types::NormalizedItem;

fn default_min_similarity() -> f64 {
    0.6
}
fn default_true() -> bool {
    true
}
fn default_boost() -> f64 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Historical performance in [0, 1]; drives the scorer's series bonus.
    #[serde(default)]
    pub performance: Option<f64>,
}

/// `[series]` config section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesMatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_boost")]
    pub boost_matched_topics: f64,
    #[serde(default)]
    pub series: Vec<SeriesDefinition>,
}

impl Default for SeriesMatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            boost_matched_topics: default_boost(),
            series: Vec::new(),
        }
    }
}

impl SeriesMatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.boost_matched_topics) {
            return Err(ConfigError::Invalid(format!(
                "series boost must be in [0,1] (got {})",
                self.boost_matched_topics
            )));
        }
        let mut ids = HashSet::new();
        for s in &self.series {
            if !ids.insert(s.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate series id {}", s.id)));
            }
            if !(0.0..=1.0).contains(&s.min_similarity) {
                return Err(ConfigError::SeriesSimilarity {
                    id: s.id.clone(),
                    value: s.min_similarity,
                });
            }
            if let Some(p) = s.performance {
                if !(0.0..=1.0).contains(&p) {
                    return Err(ConfigError::Invalid(format!(
                        "series {} performance must be in [0,1] (got {p})",
                        s.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SeriesMatch {
    pub matched: bool,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub similarity: f64,
    pub matched_terms: Vec<String>,
    /// Carried over from the definition for scoring.
    pub performance: Option<f64>,
}

struct Compiled {
    def: SeriesDefinition,
    terms: BTreeSet<String>,
}

pub struct SeriesMatcher {
    enabled: bool,
    boost: f64,
    series: Vec<Compiled>,
}

impl SeriesMatcher {
    pub fn new(config: SeriesMatcherConfig) -> Self {
        let series = config
            .series
            .into_iter()
            .filter(|s| s.enabled)
            .map(|def| Compiled {
                terms: def.terms.iter().map(|t| t.trim().to_lowercase()).collect(),
                def,
            })
            .filter(|c| !c.terms.is_empty())
            .collect();
        Self {
            enabled: config.enabled,
            boost: config.boost_matched_topics,
            series,
        }
    }

    /// Best enabled series whose similarity reaches its threshold.
    ///
    /// Ties: higher similarity, then more matched terms, then the series
    /// declared first in configuration.
    pub fn match_item(&self, item: &NormalizedItem) -> SeriesMatch {
        if !self.enabled {
            return SeriesMatch::default();
        }
        let item_terms: HashSet<String> = item.terms().into_iter().collect();

        let mut best: Option<(f64, Vec<String>, &Compiled)> = None;
        for s in &self.series {
            let matched: Vec<String> = s
                .terms
                .iter()
                .filter(|t| item_terms.contains(*t))
                .cloned()
                .collect();
            let similarity = matched.len() as f64 / s.terms.len() as f64;
            if matched.is_empty() || similarity < s.def.min_similarity {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_sim, best_terms, _)) => {
                    similarity > *best_sim
                        || (similarity == *best_sim && matched.len() > best_terms.len())
                }
            };
            if better {
                best = Some((similarity, matched, s));
            }
        }

        match best {
            Some((similarity, matched_terms, s)) => {
                tracing::debug!(
                    title = %item.title_normalized,
                    series = %s.def.name,
                    similarity,
                    "item matched series"
                );
                SeriesMatch {
                    matched: true,
                    series_id: Some(s.def.id.clone()),
                    series_name: Some(s.def.name.clone()),
                    similarity,
                    matched_terms,
                    performance: s.def.performance,
                }
            }
            None => SeriesMatch::default(),
        }
    }

    /// `boost × similarity`, 0 when unmatched.
    pub fn score_boost(&self, m: &SeriesMatch) -> f64 {
        if m.matched {
            self.boost * m.similarity
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::normalized;

    fn def(id: &str, terms: &[&str], min: f64) -> SeriesDefinition {
        SeriesDefinition {
            id: id.into(),
            name: id.to_uppercase(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            min_similarity: min,
            enabled: true,
            performance: None,
        }
    }

    fn matcher(series: Vec<SeriesDefinition>) -> SeriesMatcher {
        SeriesMatcher::new(SeriesMatcherConfig {
            series,
            ..SeriesMatcherConfig::default()
        })
    }

    #[test]
    fn threshold_example() {
        let m = matcher(vec![def("abc", &["a", "b", "c"], 0.5)]);
        let hit = m.match_item(&normalized("x", &["a", "b"], &[]));
        assert!(hit.matched);
        assert!((hit.similarity - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.score_boost(&hit) - 0.2 * 2.0 / 3.0).abs() < 1e-9);

        let miss = m.match_item(&normalized("x", &["a"], &[]));
        assert!(!miss.matched);
        assert_eq!(m.score_boost(&miss), 0.0);
    }

    #[test]
    fn tie_breaks_on_matched_count_then_order() {
        let m = matcher(vec![
            def("first", &["a", "b"], 0.5),
            def("second", &["a", "b"], 0.5),
            def("wide", &["a", "b", "c", "d"], 0.5),
        ]);
        // first/second: 1.0 with 2 terms; wide: 0.5 -> first wins by order
        let hit = m.match_item(&normalized("x", &["a", "b"], &[]));
        assert_eq!(hit.series_id.as_deref(), Some("first"));

        let m = matcher(vec![
            def("small", &["a", "b"], 0.5),
            def("big", &["a", "b", "c", "d"], 0.5),
        ]);
        // both 0.5; big has 2 matched terms vs 1
        let hit = m.match_item(&normalized("x", &["a", "c"], &[]));
        assert_eq!(hit.series_id.as_deref(), Some("big"));
    }

    #[test]
    fn disabled_and_empty_series_never_match() {
        let mut off = def("off", &["a"], 0.1);
        off.enabled = false;
        let m = matcher(vec![off, def("empty", &[], 0.0)]);
        assert!(!m.match_item(&normalized("x", &["a"], &[])).matched);

        let m = SeriesMatcher::new(SeriesMatcherConfig {
            enabled: false,
            series: vec![def("a", &["a"], 0.1)],
            ..SeriesMatcherConfig::default()
        });
        assert!(!m.match_item(&normalized("x", &["a"], &[])).matched);
    }

    #[test]
    fn categories_count_as_terms() {
        let m = matcher(vec![def("tech", &["Tech"], 1.0)]);
        assert!(m.match_item(&normalized("x", &[], &["tech"])).matched);
    }
}
