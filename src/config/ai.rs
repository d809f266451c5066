// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

fn default_provider() -> String {
    "keyword".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_timeout_secs() -> u64 {
    10
}

/// Classifier/translator settings (`[ai]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "keyword" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Category -> trigger words for the local keyword classifier.
    #[serde(default)]
    pub category_terms: BTreeMap<String, Vec<String>>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            category_terms: BTreeMap::new(),
        }
    }
}

impl AiConfig {
    /// Lowercases the provider and resolves `api_key = "ENV"`.
    pub fn resolve(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                other => anyhow::bail!("api_key = \"ENV\" unsupported for provider {other}"),
            };
        }
        self.category_terms = std::mem::take(&mut self.category_terms)
            .into_iter()
            .map(|(k, v)| {
                (
                    k.to_lowercase(),
                    v.into_iter().map(|t| t.to_lowercase()).collect(),
                )
            })
            .collect();
        Ok(())
    }
}
