//! GitHub repository search for recently created or recently pushed starred repos.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::Deserialize;
use tarb_core::{CandidateItem, RawMetrics, Source};
use tarb_storage::{HttpFetcher, Pacer};

use crate::{dedupe_by_source_id, interval_pacer, AdapterContext, AdapterError, FetchReport, SourceAdapter};

const ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub base_url: String,
    pub languages: Vec<String>,
    pub lookback_days: i64,
    pub per_page: usize,
    pub max_items: usize,
    pub min_interval_ms: u64,
    /// Loaded from `GITHUB_TOKEN`, never from files.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            languages: ["javascript", "python", "typescript", "rust"]
                .into_iter()
                .map(String::from)
                .collect(),
            lookback_days: 7,
            per_page: 20,
            max_items: 50,
            min_interval_ms: 1_000,
            token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub items: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub full_name: String,
    pub html_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

pub fn search_queries(languages: &[String], now: DateTime<Utc>, lookback_days: i64) -> Vec<String> {
    let since = (now - Duration::days(lookback_days)).format("%Y-%m-%d");
    let mut queries: Vec<String> = languages
        .iter()
        .map(|lang| format!("created:>{since} stars:>5 language:{lang}"))
        .collect();
    queries.push(format!("pushed:>{since} stars:>10"));
    queries
}

pub fn normalize_repository(repo: Repository) -> CandidateItem {
    CandidateItem {
        source_id: repo.id.to_string(),
        title: repo.full_name,
        url: repo.html_url,
        description: repo.description.unwrap_or_default(),
        raw_metrics: RawMetrics {
            stars: Some(repo.stargazers_count.unwrap_or(0)),
            created_at: repo.created_at,
            ..Default::default()
        },
    }
}

pub struct GitHubAdapter {
    config: GitHubConfig,
    pacer: Box<dyn Pacer>,
}

impl GitHubAdapter {
    pub fn new(config: GitHubConfig) -> Self {
        let pacer = interval_pacer(config.min_interval_ms);
        Self { config, pacer }
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    fn search_url(&self, query: &str) -> Result<Url, AdapterError> {
        let endpoint = format!("{}/search/repositories", self.config.base_url.trim_end_matches('/'));
        let per_page = self.config.per_page.to_string();
        Url::parse_with_params(
            &endpoint,
            &[
                ("q", query),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
            ],
        )
        .map_err(|e| AdapterError::parse(endpoint.clone(), e))
    }

    async fn search(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        query: &str,
    ) -> Result<Vec<Repository>, AdapterError> {
        let url = self.search_url(query)?;
        let authorization = self.config.token.as_ref().map(|t| format!("token {t}"));
        let mut headers = vec![("Accept", ACCEPT)];
        if let Some(value) = authorization.as_deref() {
            headers.push(("Authorization", value));
        }

        self.pacer.ready().await;
        let response: SearchResponse = http
            .fetch_json(ctx.run_id, Source::GitHub.as_str(), url.as_str(), &headers)
            .await
            .map_err(|e| {
                if e.status() == Some(403) {
                    tracing::warn!("github search rate limited; set GITHUB_TOKEN to raise the limit");
                }
                AdapterError::fetch(url.as_str(), e)
            })?;
        Ok(response.items)
    }
}

#[async_trait]
impl SourceAdapter for GitHubAdapter {
    fn source(&self) -> Source {
        Source::GitHub
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> FetchReport {
        let mut report = FetchReport::default();
        let mut items = Vec::new();
        for query in search_queries(&self.config.languages, ctx.fetched_at, self.config.lookback_days) {
            match self.search(http, ctx, &query).await {
                Ok(repos) => items.extend(repos.into_iter().map(normalize_repository)),
                Err(err) => report.record_error(&Source::GitHub, &err),
            }
        }
        let mut items = dedupe_by_source_id(items);
        items.truncate(self.config.max_items);
        report.items = items;
        report
    }
}
