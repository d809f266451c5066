//! Classification and translation boundary.
//!
//! [`Classifier`] turns a title (plus optional body) into categories, keywords,
//! named entities and a short summary, and translates titles between languages.
//! Two implementations ship:
//! * [`LlmClassifier`]: OpenAI-compatible Chat Completions endpoint.
//! * [`KeywordClassifier`]: deterministic local tokenizer, no network.
//!
//! Callers never abort an item on classifier failure; see
//! [`Classification::fallback`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ai::AiConfig;

const SUMMARY_CHARS: usize = 200;
const BODY_CHARS_FOR_PROMPT: usize = 1000;
const MAX_KEYWORDS: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub summary: String,
}

impl Classification {
    /// Used whenever classification fails: `general`, no keywords, truncated title.
    pub fn fallback(title: &str) -> Self {
        Self {
            categories: vec!["general".into()],
            keywords: Vec::new(),
            entities: BTreeMap::new(),
            summary: truncate_chars(title, SUMMARY_CHARS),
        }
    }

    /// Lowercases categories/keywords and fills an empty summary from the title.
    fn tidy(mut self, title: &str) -> Self {
        self.categories = lower_dedup(self.categories);
        self.keywords = lower_dedup(self.keywords);
        if self.summary.trim().is_empty() {
            self.summary = truncate_chars(title, SUMMARY_CHARS);
        }
        self
    }
}

fn lower_dedup(v: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    v.into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

pub(crate) fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn classify(&self, title: &str, body: Option<&str>) -> Result<Classification>;
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

pub type DynClassifier = Arc<dyn Classifier>;

/// Factory.
///
/// * `AI_TEST_MODE=mock` forces the deterministic keyword classifier.
/// * `enabled = false` or a non-`openai` provider gives the keyword classifier.
/// * Otherwise the LLM classifier; a construction failure falls back to keywords.
pub fn build_classifier(config: &AiConfig) -> DynClassifier {
    let keyword = || -> DynClassifier {
        Arc::new(KeywordClassifier::new(config.category_terms.clone()))
    };

    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return keyword();
    }
    if !config.enabled || config.provider != "openai" {
        return keyword();
    }
    match LlmClassifier::from_config(config) {
        Ok(c) => Arc::new(c) as DynClassifier,
        Err(e) => {
            tracing::warn!(error = ?e, "llm classifier unavailable, using keyword classifier");
            keyword()
        }
    }
}

// ------------------------------------------------------------
// Keyword classifier
// ------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "your", "you", "are", "was",
    "were", "will", "has", "have", "had", "not", "but", "its", "our", "out", "how", "why", "what",
    "when", "who", "new", "can", "all", "about", "over", "after", "more", "than", "just", "now",
];

fn word_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?u)\b\w+\b").unwrap())
}

/// Local, deterministic classifier. Keywords are the first distinct non-stopword
/// tokens of the title; categories come from configured trigger words.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    category_terms: BTreeMap<String, Vec<String>>,
}

impl KeywordClassifier {
    pub fn new(category_terms: BTreeMap<String, Vec<String>>) -> Self {
        Self { category_terms }
    }

    fn keywords(text: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        word_re()
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|w| w.chars().count() >= 3)
            .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .filter(|w| seen.insert(w.clone()))
            .take(MAX_KEYWORDS)
            .collect()
    }

    /// Capitalized tokens after the first word, e.g. product or company names.
    fn entities(title: &str) -> BTreeMap<String, Vec<String>> {
        let names: Vec<String> = word_re()
            .find_iter(title)
            .skip(1)
            .map(|m| m.as_str())
            .filter(|w| w.chars().next().is_some_and(|c| c.is_uppercase()) && w.len() > 1)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut out = BTreeMap::new();
        if !names.is_empty() {
            out.insert("name".to_string(), names);
        }
        out
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn classify(&self, title: &str, body: Option<&str>) -> Result<Classification> {
        let text = match body {
            Some(b) if b.chars().count() < BODY_CHARS_FOR_PROMPT => format!("{title} {b}"),
            _ => title.to_string(),
        };
        let keywords = Self::keywords(&text);
        let lowered = text.to_lowercase();
        let mut categories: Vec<String> = self
            .category_terms
            .iter()
            .filter(|(_, triggers)| triggers.iter().any(|t| lowered.contains(t.as_str())))
            .map(|(c, _)| c.clone())
            .collect();
        if categories.is_empty() {
            categories.push("general".into());
        }
        Ok(Classification {
            categories,
            keywords,
            entities: Self::entities(title),
            summary: String::new(),
        }
        .tidy(title))
    }

    async fn translate(&self, _text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        anyhow::bail!("keyword classifier cannot translate {source_lang} -> {target_lang}")
    }
}

// ------------------------------------------------------------
// LLM classifier (OpenAI-compatible)
// ------------------------------------------------------------

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}
#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    content: String,
}

const CLASSIFY_PROMPT: &str = "Classify the topic below. Respond with JSON only, shaped as \
{\"categories\": [..], \"keywords\": [..], \"entities\": {\"<type>\": [..]}, \"summary\": \"..\"}. \
Use 1-3 broad categories, 3-8 keywords, and a summary of at most 200 characters.";

pub struct LlmClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl LlmClassifier {
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        anyhow::ensure!(!config.api_key.is_empty(), "missing api key for llm classifier");
        let http = reqwest::Client::builder()
            .user_agent("topic-collector/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }

    async fn chat(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
            max_tokens,
        };
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("chat completions request")?
            .error_for_status()
            .context("chat completions status")?;
        let body: Resp = resp.json().await.context("chat completions body")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        anyhow::ensure!(!content.trim().is_empty(), "empty completion");
        Ok(content.trim().to_string())
    }
}

/// Strips a surrounding ```json / ``` fence if the model added one.
pub fn extract_json(text: &str) -> &str {
    let t = text.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = t.find(fence) {
            let rest = &t[start + fence.len()..];
            let end = rest.find("```").unwrap_or(rest.len());
            return rest[..end].trim();
        }
    }
    t
}

#[async_trait]
impl Classifier for LlmClassifier {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn classify(&self, title: &str, body: Option<&str>) -> Result<Classification> {
        let input = match body {
            Some(b) if b.chars().count() < BODY_CHARS_FOR_PROMPT => format!("{title}\n\n{b}"),
            _ => title.to_string(),
        };
        let raw = self.chat(CLASSIFY_PROMPT, &input, 400).await?;
        let parsed: Classification =
            serde_json::from_str(extract_json(&raw)).context("parsing classification json")?;
        Ok(parsed.tidy(title))
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let system = format!(
            "Translate the user's text from {} to {}. Output only the translation.",
            language_name(source_lang),
            language_name(target_lang)
        );
        self.chat(&system, text, 200).await
    }
}

fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "ko" => "Korean",
        "ja" => "Japanese",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_shape() {
        let long = "x".repeat(300);
        let c = Classification::fallback(&long);
        assert_eq!(c.categories, vec!["general".to_string()]);
        assert!(c.keywords.is_empty());
        assert_eq!(c.summary.chars().count(), 200);
    }

    #[test]
    fn extract_json_handles_fences() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("here:\n```\n{}\n```"), "{}");
        assert_eq!(extract_json(" {\"b\":2} "), "{\"b\":2}");
    }

    #[tokio::test]
    async fn keyword_classifier_is_deterministic() {
        let c = KeywordClassifier::new(BTreeMap::from([(
            "programming".into(),
            vec!["rust".into()],
        )]));
        let a = c.classify("Why Rust beats the rest for CLI tools", None).await.unwrap();
        let b = c.classify("Why Rust beats the rest for CLI tools", None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.categories, vec!["programming".to_string()]);
        assert_eq!(a.keywords, vec!["rust", "beats", "rest", "cli", "tools"]);
        assert_eq!(a.entities["name"], vec!["CLI".to_string(), "Rust".to_string()]);
        assert_eq!(a.summary, "Why Rust beats the rest for CLI tools");
    }

    #[tokio::test]
    async fn keyword_classifier_defaults_to_general() {
        let c = KeywordClassifier::default();
        let out = c.classify("plain words here", None).await.unwrap();
        assert_eq!(out.categories, vec!["general".to_string()]);
        assert!(c.translate("x", "en", "ko").await.is_err());
    }

    #[test]
    fn tidy_lowercases_and_dedups() {
        let c = Classification {
            categories: vec!["Tech".into(), "tech".into()],
            keywords: vec![" AI ".into()],
            entities: BTreeMap::new(),
            summary: String::new(),
        }
        .tidy("Title");
        assert_eq!(c.categories, vec!["tech".to_string()]);
        assert_eq!(c.keywords, vec!["ai".to_string()]);
        assert_eq!(c.summary, "Title");
    }
}
