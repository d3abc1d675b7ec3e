//! Source adapter contract + the Reddit, Hacker News, GitHub and feed adapters.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tarb_core::{CandidateItem, Source};
use tarb_storage::{FetchError, HttpFetcher, IntervalPacer, Pacer};
use thiserror::Error;
use uuid::Uuid;

pub mod github;
pub mod hackernews;
pub mod reddit;
pub mod rss;

pub use github::{GitHubAdapter, GitHubConfig};
pub use hackernews::{HackerNewsAdapter, HackerNewsConfig};
pub use reddit::{RedditAdapter, RedditConfig};
pub use rss::{RssAdapter, RssConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

/// Everything one adapter produced in a run. Upstream failures end up in `errors`, never as `Err`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchReport {
    pub items: Vec<CandidateItem>,
    pub errors: Vec<String>,
}

impl FetchReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            errors: vec![error.into()],
        }
    }

    fn record_error(&mut self, source: &Source, err: &AdapterError) {
        tracing::warn!(%source, error = %err, "source fetch failed");
        self.errors.push(err.to_string());
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("parsing {what}: {message}")]
    Parse { what: String, message: String },
    #[error("{0}")]
    Message(String),
}

impl AdapterError {
    fn fetch(url: impl Into<String>, source: FetchError) -> Self {
        AdapterError::Fetch {
            url: url.into(),
            source,
        }
    }

    fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        AdapterError::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> Source;

    /// Fetches and normalizes the source's current candidates. Must not fail past this boundary.
    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> FetchReport;
}

/// Per-source settings as they appear in `sources.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum AdapterSettings {
    Reddit(RedditConfig),
    HackerNews(HackerNewsConfig),
    GitHub(GitHubConfig),
    Rss(RssConfig),
}

impl AdapterSettings {
    pub fn source(&self) -> Source {
        match self {
            AdapterSettings::Reddit(_) => Source::Reddit,
            AdapterSettings::HackerNews(_) => Source::HackerNews,
            AdapterSettings::GitHub(_) => Source::GitHub,
            AdapterSettings::Rss(_) => Source::Rss,
        }
    }
}

pub fn adapter_for_settings(settings: &AdapterSettings) -> Arc<dyn SourceAdapter> {
    match settings {
        AdapterSettings::Reddit(c) => Arc::new(RedditAdapter::new(c.clone())),
        AdapterSettings::HackerNews(c) => Arc::new(HackerNewsAdapter::new(c.clone())),
        AdapterSettings::GitHub(c) => Arc::new(GitHubAdapter::new(c.clone())),
        AdapterSettings::Rss(c) => Arc::new(RssAdapter::new(c.clone())),
    }
}

pub(crate) fn interval_pacer(min_interval_ms: u64) -> Box<dyn Pacer> {
    Box::new(IntervalPacer::new(Duration::from_millis(min_interval_ms)))
}

/// Dedupes by `source_id`: the first sighting keeps its position, the latest one its content.
pub fn dedupe_by_source_id(items: Vec<CandidateItem>) -> Vec<CandidateItem> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<CandidateItem> = Vec::with_capacity(items.len());
    for item in items {
        match positions.get(&item.source_id) {
            Some(&i) => out[i] = item,
            None => {
                positions.insert(item.source_id.clone(), out.len());
                out.push(item);
            }
        }
    }
    out
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub(crate) fn from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp(seconds.trunc() as i64, 0)
}

pub(crate) fn non_negative(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

/// Captured upstream payload under the workspace `fixtures/` directory.
pub fn load_fixture(workspace_root: impl AsRef<Path>, relative: &str) -> std::io::Result<Vec<u8>> {
    std::fs::read(workspace_root.as_ref().join("fixtures").join(relative))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    pub fn workspace_root() -> PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    pub fn fixture(relative: &str) -> Vec<u8> {
        super::load_fixture(workspace_root(), relative).expect("fixture")
    }
}
