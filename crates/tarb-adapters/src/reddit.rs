//! Reddit `rising` + `new` listings over the public JSON endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use tarb_core::{CandidateItem, RawMetrics, Source};
use tarb_storage::{HttpFetcher, Pacer};

use crate::{
    dedupe_by_source_id, from_unix_seconds, interval_pacer, non_negative, truncate_chars,
    AdapterContext, AdapterError, FetchReport, SourceAdapter,
};

const PERMALINK_HOST: &str = "https://reddit.com";
const DESCRIPTION_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub base_url: String,
    pub subreddits: Vec<String>,
    pub rising_limit: usize,
    pub new_limit: usize,
    pub min_interval_ms: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            subreddits: [
                "programming",
                "technology",
                "MachineLearning",
                "artificial",
                "webdev",
                "startups",
                "Entrepreneur",
                "gamedev",
                "cscareerquestions",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            rising_limit: 15,
            new_limit: 10,
            min_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
pub struct Child {
    pub data: Post,
}

#[derive(Debug, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub ups: Option<i64>,
    #[serde(default)]
    pub num_comments: Option<i64>,
    #[serde(default)]
    pub created_utc: Option<f64>,
}

pub fn normalize_post(post: Post) -> CandidateItem {
    let url = if post.url.starts_with("http") {
        post.url
    } else {
        format!("{PERMALINK_HOST}{}", post.url)
    };
    CandidateItem {
        source_id: post.id,
        title: post.title,
        url,
        description: post
            .selftext
            .map(|text| truncate_chars(&text, DESCRIPTION_CHARS))
            .unwrap_or_default(),
        raw_metrics: RawMetrics {
            upvotes: Some(non_negative(post.ups)),
            comments: Some(non_negative(post.num_comments)),
            created_at: post.created_utc.and_then(from_unix_seconds),
            ..Default::default()
        },
    }
}

pub fn parse_listing(listing: Listing) -> Vec<CandidateItem> {
    listing
        .data
        .children
        .into_iter()
        .map(|child| normalize_post(child.data))
        .collect()
}

pub struct RedditAdapter {
    config: RedditConfig,
    pacer: Box<dyn Pacer>,
}

impl RedditAdapter {
    pub fn new(config: RedditConfig) -> Self {
        let pacer = interval_pacer(config.min_interval_ms);
        Self { config, pacer }
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    fn listing_url(&self, subreddit: &str, sort: &str, limit: usize) -> String {
        format!(
            "{}/r/{subreddit}/{sort}.json?limit={limit}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        subreddit: &str,
        sort: &str,
        limit: usize,
    ) -> Result<Vec<CandidateItem>, AdapterError> {
        let url = self.listing_url(subreddit, sort, limit);
        self.pacer.ready().await;
        let listing: Listing = http
            .fetch_json(ctx.run_id, Source::Reddit.as_str(), &url, &[])
            .await
            .map_err(|e| AdapterError::fetch(&url, e))?;
        Ok(parse_listing(listing))
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn source(&self) -> Source {
        Source::Reddit
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> FetchReport {
        let mut report = FetchReport::default();
        for subreddit in &self.config.subreddits {
            let mut combined = Vec::new();
            for (sort, limit) in [("rising", self.config.rising_limit), ("new", self.config.new_limit)] {
                match self.fetch_listing(http, ctx, subreddit, sort, limit).await {
                    Ok(items) => combined.extend(items),
                    Err(err) => report.record_error(&Source::Reddit, &err),
                }
            }
            let unique = dedupe_by_source_id(combined);
            tracing::debug!(subreddit = %subreddit, count = unique.len(), "subreddit fetched");
            report.items.extend(unique);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;

    #[test]
    fn rising_fixture_normalizes_posts() {
        let listing: Listing = serde_json::from_slice(&fixture("reddit/rising.json")).expect("fixture json");
        let items = parse_listing(listing);
        assert_eq!(items.len(), 3);

        let first = &items[0];
        assert_eq!(first.source_id, "1abc01");
        assert_eq!(first.url, "https://example.com/wasm-runtime");
        assert_eq!(first.raw_metrics.upvotes, Some(412));
        assert_eq!(first.raw_metrics.comments, Some(57));
        assert_eq!(first.raw_metrics.created_at.map(|t| t.timestamp()), Some(1_767_225_600));
        assert_eq!(first.raw_metrics.stars, None);
    }

    #[test]
    fn relative_urls_get_reddit_host_and_selftext_is_truncated() {
        let post = Post {
            id: "x1".into(),
            title: "Ask: which runtime?".into(),
            url: "/r/programming/comments/x1/ask/".into(),
            selftext: Some("é".repeat(250)),
            ups: Some(-4),
            num_comments: None,
            created_utc: None,
        };
        let item = normalize_post(post);
        assert_eq!(item.url, "https://reddit.com/r/programming/comments/x1/ask/");
        assert_eq!(item.description.chars().count(), 200);
        assert_eq!(item.raw_metrics.upvotes, Some(0));
        assert_eq!(item.raw_metrics.comments, Some(0));
        assert_eq!(item.raw_metrics.created_at, None);
    }

    #[test]
    fn listing_urls_respect_base_and_limit() {
        let adapter = RedditAdapter::new(RedditConfig {
            base_url: "http://127.0.0.1:9/".into(),
            ..Default::default()
        });
        assert_eq!(
            adapter.listing_url("rust", "rising", 15),
            "http://127.0.0.1:9/r/rust/rising.json?limit=15"
        );
    }
}
