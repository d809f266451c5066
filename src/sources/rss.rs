use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;

use super::SourceAdapter;
use crate::normalize::normalize_text;
use crate::types::{ParamValue, RawItem, SourceParams, SourceScope};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_pub_date(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(ts.trim())
        .or_else(|_| DateTime::parse_from_rfc3339(ts.trim()))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

/// RSS 2.0 feed adapter.
///
/// Scoped feeds honour two parameters: `keywords` (one or many; an item is
/// kept if its title contains any of them, case-insensitive) and `limit`.
pub struct RssFeedSource {
    source_type: String,
    scope: SourceScope,
    host: Option<String>,
    mode: Mode,
}

impl RssFeedSource {
    pub fn from_fixture_str(source_type: &str, scope: SourceScope, xml: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            scope,
            host: None,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(
        source_type: &str,
        scope: SourceScope,
        url: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let parsed = url::Url::parse(url).with_context(|| format!("invalid feed url {url}"))?;
        let client = reqwest::Client::builder()
            .user_agent("topic-collector/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            source_type: source_type.to_string(),
            scope,
            host: parsed.host_str().map(str::to_string),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        })
    }

    fn parse_items_from_str(&self, s: &str) -> Result<Vec<RawItem>> {
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing {} rss xml", self.source_type))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                continue;
            }
            let body = it
                .description
                .as_deref()
                .map(normalize_text)
                .filter(|b| !b.is_empty());
            let link = it.link.unwrap_or_default();
            let source_id = it
                .guid
                .filter(|g| !g.trim().is_empty())
                .unwrap_or_else(|| if link.is_empty() { title.clone() } else { link.clone() });

            let mut item = RawItem::new(&self.source_type, &source_id, &title);
            item.source_url = link;
            item.body = body;
            item.published_at = it.pub_date.as_deref().and_then(parse_pub_date);
            out.push(item);
        }
        Ok(out)
    }

    async fn fetch_body(&self) -> Result<String> {
        match &self.mode {
            Mode::Fixture(s) => Ok(s.clone()),
            Mode::Http { url, client } => client
                .get(url)
                .send()
                .await
                .with_context(|| format!("{} http get()", self.source_type))?
                .error_for_status()
                .with_context(|| format!("{} http status", self.source_type))?
                .text()
                .await
                .with_context(|| format!("{} http .text()", self.source_type)),
        }
    }
}

fn apply_params(mut items: Vec<RawItem>, params: &SourceParams) -> Vec<RawItem> {
    let keywords: Vec<String> = match params.get("keywords") {
        Some(ParamValue::One(k)) => vec![k.to_lowercase()],
        Some(ParamValue::Many(ks)) => ks.iter().map(|k| k.to_lowercase()).collect(),
        None => Vec::new(),
    };
    if !keywords.is_empty() {
        items.retain(|it| {
            let t = it.title.to_lowercase();
            keywords.iter().any(|k| t.contains(k.as_str()))
        });
    }
    if let Some(ParamValue::One(limit)) = params.get("limit") {
        if let Ok(n) = limit.parse::<usize>() {
            items.truncate(n);
        }
    }
    items
}

#[async_trait]
impl SourceAdapter for RssFeedSource {
    fn name(&self) -> &str {
        &self.source_type
    }

    fn scope(&self) -> SourceScope {
        self.scope
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    async fn collect(&self, params: &SourceParams) -> Result<Vec<RawItem>> {
        let body = self.fetch_body().await?;
        let items = self.parse_items_from_str(&body)?;
        Ok(apply_params(items, params))
    }

    async fn health_check(&self) -> bool {
        match &self.mode {
            Mode::Fixture(_) => true,
            Mode::Http { url, client } => client
                .head(url)
                .send()
                .await
                .map(|r| r.status().is_success())
                .unwrap_or(false),
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
<item><title>Rust 2.0 announced&nbsp;today</title><link>https://ex.com/a</link>
<pubDate>Tue, 10 Jun 2025 12:00:00 +0000</pubDate><description>&lt;p&gt;Big news&lt;/p&gt;</description></item>
<item><title>Go generics deep dive</title><link>https://ex.com/b</link><guid>b-1</guid></item>
<item><title>   </title></item>
</channel></rss>"#;

    #[tokio::test]
    async fn fixture_parses_items() {
        let src = RssFeedSource::from_fixture_str("news", SourceScope::Global, XML);
        let items = src.collect(&SourceParams::new()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Rust 2.0 announced today");
        assert_eq!(items[0].source_id, "https://ex.com/a");
        assert_eq!(items[0].body.as_deref(), Some("Big news"));
        assert!(items[0].published_at.is_some());
        assert_eq!(items[1].source_id, "b-1");
        assert!(items[1].published_at.is_none());
    }

    #[tokio::test]
    async fn keyword_and_limit_params() {
        let src = RssFeedSource::from_fixture_str("news", SourceScope::Scoped, XML);
        let mut params = SourceParams::new();
        params.insert("keywords".into(), ParamValue::Many(vec!["GO".into()]));
        let items = src.collect(&params).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_id, "b-1");

        let mut params = SourceParams::new();
        params.insert("limit".into(), ParamValue::One("1".into()));
        assert_eq!(src.collect(&params).await.unwrap().len(), 1);
    }

    #[test]
    fn url_host_is_extracted() {
        let src = RssFeedSource::from_url(
            "hn",
            SourceScope::Global,
            "https://news.ycombinator.com/rss",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(src.host(), Some("news.ycombinator.com"));
        let bad = RssFeedSource::from_url(
            "x",
            SourceScope::Global,
            "not a url",
            Duration::from_secs(1),
        );
        assert!(bad.is_err());
    }
}
