// src/testing.rs
//! Test doubles shared by unit and integration tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::classify::{Classification, Classifier};
use crate::normalize::content_hash;
use crate::sources::SourceAdapter;
use crate::types::{NormalizedItem, RawItem, SourceParams, SourceScope};

/// A normalized item with the given (already lowercase) title and terms.
pub fn normalized(title: &str, keywords: &[&str], categories: &[&str]) -> NormalizedItem {
    let mut item = NormalizedItem {
        source_id: title.to_string(),
        source_type: "test".into(),
        source_url: String::new(),
        title: title.to_string(),
        body: None,
        published_at: None,
        metrics: BTreeMap::new(),
        metadata: BTreeMap::new(),
        language: "en".into(),
        title_translated: None,
        title_normalized: title.to_string(),
        summary: title.to_string(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        categories: categories.iter().map(|s| s.to_string()).collect(),
        entities: BTreeMap::new(),
        content_hash: String::new(),
    };
    item.content_hash = content_hash(&item.title_normalized, &item.terms());
    item
}

/// Returns the same classification for every title; `failing()` always errors.
pub struct FixedClassifier {
    result: Option<Classification>,
}

impl FixedClassifier {
    pub fn new(result: Classification) -> Self {
        Self {
            result: Some(result),
        }
    }

    pub fn failing() -> Self {
        Self { result: None }
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn classify(&self, _title: &str, _body: Option<&str>) -> Result<Classification> {
        match &self.result {
            Some(c) => Ok(c.clone()),
            None => bail!("classifier unavailable"),
        }
    }

    async fn translate(&self, _text: &str, _src: &str, _dst: &str) -> Result<String> {
        bail!("translator unavailable")
    }
}

/// Serves a fixed item list and counts calls.
pub struct StaticSource {
    name: String,
    scope: SourceScope,
    items: Vec<RawItem>,
    host: Option<String>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticSource {
    fn new(name: &str, scope: SourceScope, items: Vec<RawItem>) -> Self {
        Self {
            name: name.to_string(),
            scope,
            items,
            host: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn global(name: &str, items: Vec<RawItem>) -> Self {
        Self::new(name, SourceScope::Global, items)
    }

    pub fn scoped(name: &str, items: Vec<RawItem>) -> Self {
        Self::new(name, SourceScope::Scoped, items)
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Sleeps before answering (pair with paused tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared call counter; stays valid after the source is moved into a registry.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> SourceScope {
        self.scope
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    async fn collect(&self, _params: &SourceParams) -> Result<Vec<RawItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        Ok(self.items.clone())
    }
}

/// Always fails to collect.
pub struct FailingSource {
    name: String,
    scope: SourceScope,
}

impl FailingSource {
    pub fn new(name: &str, scope: SourceScope) -> Self {
        Self {
            name: name.to_string(),
            scope,
        }
    }
}

#[async_trait]
impl SourceAdapter for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scope(&self) -> SourceScope {
        self.scope
    }

    async fn collect(&self, _params: &SourceParams) -> Result<Vec<RawItem>> {
        bail!("{} is down", self.name)
    }

    async fn health_check(&self) -> bool {
        false
    }
}
