// src/normalize.rs
//! Raw item normalization: text cleanup, language detection, translation,
//! classification and the content hash used for deduplication.

use anyhow::Result;
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::classify::{Classification, DynClassifier};
use crate::types::{NormalizedItem, RawItem};

const TEXT_CAP_CHARS: usize = 1500;

/// Cleanup for text scraped from feeds/HTML: entities, tags, typographic quotes, whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) “ ” ‘ ’ « » -> ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = collapse_ws(&out);

    if out.chars().count() > TEXT_CAP_CHARS {
        out = out.chars().take(TEXT_CAP_CHARS).collect();
    }
    out
}

fn collapse_ws(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s, " ").trim().to_string()
}

/// Canonical title form used for matching and hashing.
///
/// URLs are removed, whitespace collapsed, a leading `Show HN:` / `Ask HN:` /
/// `Tell HN:` dropped, and the result lowercased.
pub fn clean_title(title: &str) -> String {
    static RE_URL: OnceCell<Regex> = OnceCell::new();
    static RE_HN: OnceCell<Regex> = OnceCell::new();
    let re_url = RE_URL.get_or_init(|| Regex::new(r"https?://\S+").unwrap());
    let re_hn = RE_HN.get_or_init(|| Regex::new(r"(?i)^(show hn|ask hn|tell hn):\s*").unwrap());

    let no_urls = re_url.replace_all(title, "");
    let collapsed = collapse_ws(&no_urls);
    re_hn.replace(&collapsed, "").to_lowercase()
}

/// Script-based detection: Hangul -> "ko", kana -> "ja", otherwise "en".
pub fn detect_language(text: &str) -> &'static str {
    if text.chars().any(|c| ('\u{AC00}'..='\u{D7A3}').contains(&c)) {
        return "ko";
    }
    if text
        .chars()
        .any(|c| ('\u{3040}'..='\u{309F}').contains(&c) || ('\u{30A0}'..='\u{30FF}').contains(&c))
    {
        return "ja";
    }
    "en"
}

/// `sha256_hex(title_normalized | sorted(terms) joined by "|")`.
pub fn content_hash(title_normalized: &str, terms: &[String]) -> String {
    let mut sorted: Vec<&str> = terms.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(title_normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(sorted.join("|").as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub struct Normalizer {
    classifier: DynClassifier,
    target_language: String,
}

impl Normalizer {
    pub fn new(classifier: DynClassifier, target_language: impl Into<String>) -> Self {
        Self {
            classifier,
            target_language: target_language.into(),
        }
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Fails only when nothing usable is left of the title. Classifier and
    /// translator errors degrade to fallbacks.
    pub async fn normalize(&self, raw: &RawItem) -> Result<NormalizedItem> {
        let title_normalized = clean_title(&raw.title);
        anyhow::ensure!(
            !title_normalized.is_empty(),
            "empty title after cleanup (source {} id {})",
            raw.source_type,
            raw.source_id
        );

        let language = detect_language(&raw.title);
        let title_translated = if language != self.target_language {
            match self
                .classifier
                .translate(&raw.title, language, &self.target_language)
                .await
            {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::debug!(
                        error = ?e,
                        source = %raw.source_type,
                        "translation failed, keeping original"
                    );
                    Some(raw.title.clone())
                }
            }
        } else {
            None
        };

        let classification = match self.classifier.classify(&raw.title, raw.body.as_deref()).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    classifier = self.classifier.name(),
                    "classification failed, using fallback"
                );
                Classification::fallback(&raw.title)
            }
        };

        let mut item = NormalizedItem {
            source_id: raw.source_id.clone(),
            source_type: raw.source_type.clone(),
            source_url: raw.source_url.clone(),
            title: raw.title.clone(),
            body: raw.body.clone(),
            published_at: raw.published_at,
            metrics: raw.metrics.clone(),
            metadata: raw.metadata.clone(),
            language: language.to_string(),
            title_translated,
            title_normalized,
            summary: classification.summary,
            keywords: classification.keywords,
            categories: classification.categories,
            entities: classification.entities,
            content_hash: String::new(),
        };
        item.content_hash = content_hash(&item.title_normalized, &item.terms());
        Ok(item)
    }
}
