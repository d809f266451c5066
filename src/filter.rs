// src/filter.rs
//! Include/exclude term filter over normalized items.
//!
//! Searchable text is the lowercased normalized title plus keywords and
//! categories. Exclusion is evaluated first and always wins.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::NormalizedItem;

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTerm {
    pub name: String,
    /// 0..=3; feeds `include_weight` only.
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub subcategories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordTerm {
    pub keyword: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// `[filter]` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterRule {
    #[serde(default)]
    pub include_categories: Vec<CategoryTerm>,
    #[serde(default)]
    pub include_keywords: Vec<KeywordTerm>,
    #[serde(default)]
    pub exclude_categories: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub require_category_match: bool,
    #[serde(default)]
    pub require_keyword_match: bool,
}

impl FilterRule {
    pub fn lowercased(mut self) -> Self {
        let low = |v: &mut Vec<String>| {
            for s in v.iter_mut() {
                *s = s.trim().to_lowercase();
            }
            v.retain(|s| !s.is_empty());
        };
        for c in &mut self.include_categories {
            c.name = c.name.trim().to_lowercase();
            low(&mut c.subcategories);
        }
        for k in &mut self.include_keywords {
            k.keyword = k.keyword.trim().to_lowercase();
            low(&mut k.synonyms);
        }
        low(&mut self.exclude_categories);
        low(&mut self.exclude_keywords);
        self
    }

    pub fn has_includes(&self) -> bool {
        !self.include_categories.is_empty() || !self.include_keywords.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    ExcludedTerm,
    NoIncludeMatch,
    MissingRequiredCategory,
    MissingRequiredKeyword,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FilterOutcome {
    pub passed: bool,
    pub reason: Option<FilterReason>,
    /// Parent names of matched include terms (categories first).
    pub matched_include_terms: Vec<String>,
    /// `max(avg(weights of matched includes), 1.0)`. Ranking hook, never a cutoff.
    pub include_weight: f64,
}

impl FilterOutcome {
    fn reject(reason: FilterReason) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            matched_include_terms: Vec::new(),
            include_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TermFilter {
    rule: FilterRule,
}

impl TermFilter {
    pub fn new(rule: FilterRule) -> Self {
        Self {
            rule: rule.lowercased(),
        }
    }

    /// Unweighted filter from plain term lists (per-consumer overrides).
    pub fn from_terms<I, E, S, T>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self::new(FilterRule {
            include_keywords: include
                .into_iter()
                .map(|k| KeywordTerm {
                    keyword: k.into(),
                    weight: 1.0,
                    synonyms: Vec::new(),
                })
                .collect(),
            exclude_keywords: exclude.into_iter().map(Into::into).collect(),
            ..FilterRule::default()
        })
    }

    pub fn rule(&self) -> &FilterRule {
        &self.rule
    }

    pub fn filter(&self, item: &NormalizedItem) -> FilterOutcome {
        let categories: HashSet<String> =
            item.categories.iter().map(|c| c.to_lowercase()).collect();
        let text = searchable_text(item);

        if let Some(term) = self
            .rule
            .exclude_categories
            .iter()
            .find(|c| categories.contains(c.as_str()))
            .or_else(|| {
                self.rule
                    .exclude_keywords
                    .iter()
                    .find(|k| text.contains(k.as_str()))
            })
        {
            tracing::debug!(title = %item.title_normalized, excluded = %term, "item excluded");
            return FilterOutcome::reject(FilterReason::ExcludedTerm);
        }

        if !self.rule.has_includes() {
            return FilterOutcome {
                passed: true,
                reason: None,
                matched_include_terms: Vec::new(),
                include_weight: 1.0,
            };
        }

        let matched_cats: Vec<&CategoryTerm> = self
            .rule
            .include_categories
            .iter()
            .filter(|c| {
                categories.contains(&c.name)
                    || c.subcategories.iter().any(|s| categories.contains(s))
            })
            .collect();
        let matched_kws: Vec<&KeywordTerm> = self
            .rule
            .include_keywords
            .iter()
            .filter(|k| {
                text.contains(k.keyword.as_str())
                    || k.synonyms.iter().any(|s| text.contains(s.as_str()))
            })
            .collect();

        if matched_cats.is_empty() && matched_kws.is_empty() {
            return FilterOutcome::reject(FilterReason::NoIncludeMatch);
        }
        if self.rule.require_category_match
            && !self.rule.include_categories.is_empty()
            && matched_cats.is_empty()
        {
            return FilterOutcome::reject(FilterReason::MissingRequiredCategory);
        }
        if self.rule.require_keyword_match
            && !self.rule.include_keywords.is_empty()
            && matched_kws.is_empty()
        {
            return FilterOutcome::reject(FilterReason::MissingRequiredKeyword);
        }

        let weights: Vec<f64> = matched_cats
            .iter()
            .map(|c| c.weight)
            .chain(matched_kws.iter().map(|k| k.weight))
            .collect();
        let avg = weights.iter().sum::<f64>() / weights.len() as f64;

        FilterOutcome {
            passed: true,
            reason: None,
            matched_include_terms: matched_cats
                .iter()
                .map(|c| c.name.clone())
                .chain(matched_kws.iter().map(|k| k.keyword.clone()))
                .collect(),
            include_weight: avg.max(1.0),
        }
    }
}

fn searchable_text(item: &NormalizedItem) -> String {
    let mut parts = vec![item.title_normalized.to_lowercase()];
    parts.extend(item.keywords.iter().map(|k| k.to_lowercase()));
    parts.extend(item.categories.iter().map(|c| c.to_lowercase()));
    parts.join(" ")
}
