//! Hacker News Firebase API: `newstories` + `beststories`, then per-item details.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tarb_core::{CandidateItem, RawMetrics, Source};
use tarb_storage::{HttpFetcher, Pacer};

use crate::{
    from_unix_seconds, interval_pacer, non_negative, AdapterContext, AdapterError, FetchReport,
    SourceAdapter,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HackerNewsConfig {
    pub base_url: String,
    pub item_page_url: String,
    pub lists: Vec<String>,
    pub list_limit: usize,
    pub max_items: usize,
    pub detail_concurrency: usize,
    pub min_interval_ms: u64,
}

impl Default for HackerNewsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hacker-news.firebaseio.com/v0".to_string(),
            item_page_url: "https://news.ycombinator.com/item?id=".to_string(),
            lists: vec!["newstories".to_string(), "beststories".to_string()],
            list_limit: 50,
            max_items: 60,
            detail_concurrency: 10,
            min_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HnItem {
    pub id: u64,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub descendants: Option<i64>,
    #[serde(default)]
    pub time: Option<i64>,
}

impl HnItem {
    pub fn is_live_story(&self) -> bool {
        self.kind.as_deref() == Some("story") && !self.deleted
    }
}

/// Order-preserving union of the id lists, each cut to `list_limit`, then cut to `max_items`.
pub fn merge_story_ids(lists: &[Vec<u64>], list_limit: usize, max_items: usize) -> Vec<u64> {
    let mut seen = HashSet::new();
    lists
        .iter()
        .flat_map(|ids| ids.iter().take(list_limit))
        .copied()
        .filter(|id| seen.insert(*id))
        .take(max_items)
        .collect()
}

pub fn normalize_item(item: HnItem, item_page_url: &str) -> CandidateItem {
    let url = match item.url {
        Some(url) if !url.is_empty() => url,
        _ => format!("{item_page_url}{}", item.id),
    };
    let title = match item.title {
        Some(title) if !title.is_empty() => title,
        _ => "Untitled".to_string(),
    };
    CandidateItem {
        source_id: item.id.to_string(),
        title,
        url,
        description: String::new(),
        raw_metrics: RawMetrics {
            upvotes: Some(non_negative(item.score)),
            comments: Some(non_negative(item.descendants)),
            created_at: item.time.and_then(|t| from_unix_seconds(t as f64)),
            ..Default::default()
        },
    }
}

pub struct HackerNewsAdapter {
    config: HackerNewsConfig,
    pacer: Box<dyn Pacer>,
}

impl HackerNewsAdapter {
    pub fn new(config: HackerNewsConfig) -> Self {
        let pacer = interval_pacer(config.min_interval_ms);
        Self { config, pacer }
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn fetch_ids(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        list: &str,
    ) -> Result<Vec<u64>, AdapterError> {
        let url = format!("{}/{list}.json", self.base());
        self.pacer.ready().await;
        http.fetch_json(ctx.run_id, Source::HackerNews.as_str(), &url, &[])
            .await
            .map_err(|e| AdapterError::fetch(&url, e))
    }

    async fn fetch_item(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        id: u64,
    ) -> Result<Option<HnItem>, AdapterError> {
        let url = format!("{}/item/{id}.json", self.base());
        http.fetch_json(ctx.run_id, Source::HackerNews.as_str(), &url, &[])
            .await
            .map_err(|e| AdapterError::fetch(&url, e))
    }
}

#[async_trait]
impl SourceAdapter for HackerNewsAdapter {
    fn source(&self) -> Source {
        Source::HackerNews
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> FetchReport {
        let mut report = FetchReport::default();

        let mut lists = Vec::with_capacity(self.config.lists.len());
        for list in &self.config.lists {
            match self.fetch_ids(http, ctx, list).await {
                Ok(ids) => lists.push(ids),
                Err(err) => report.record_error(&Source::HackerNews, &err),
            }
        }
        let ids = merge_story_ids(&lists, self.config.list_limit, self.config.max_items);

        let details: Vec<Result<Option<HnItem>, AdapterError>> = stream::iter(ids)
            .map(|id| self.fetch_item(http, ctx, id))
            .buffered(self.config.detail_concurrency.max(1))
            .collect()
            .await;

        let mut failed_lookups = 0usize;
        for detail in details {
            match detail {
                Ok(Some(item)) if item.is_live_story() => {
                    report.items.push(normalize_item(item, &self.config.item_page_url));
                }
                Ok(_) => {}
                Err(err) => {
                    failed_lookups += 1;
                    tracing::debug!(error = %err, "hacker news item lookup failed");
                }
            }
        }
        if failed_lookups > 0 {
            let err = AdapterError::Message(format!("{failed_lookups} item lookups failed"));
            report.record_error(&Source::HackerNews, &err);
        }
        report
    }
}
