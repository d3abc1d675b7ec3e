//! RSS/Atom feeds with optional vote-count enrichment for Product Hunt style pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use scraper::{Html, Selector};
use serde::Deserialize;
use tarb_core::{CandidateItem, RawMetrics, Source};
use tarb_storage::{HttpFetcher, Pacer};

use crate::{interval_pacer, AdapterContext, AdapterError, FetchReport, SourceAdapter};

const VOTE_BUTTON_SELECTOR: &str = r#"[data-test="vote-button"]"#;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RssConfig {
    pub feeds: Vec<String>,
    pub max_items_per_feed: usize,
    pub enrich_first: usize,
    /// Item links on these hosts get their vote button scraped.
    pub vote_scrape_hosts: Vec<String>,
    pub min_interval_ms: u64,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            feeds: [
                "https://hnrss.org/newest",
                "https://www.producthunt.com/feed",
                "https://dev.to/feed",
                "https://www.smashingmagazine.com/feed/",
                "https://css-tricks.com/feed/",
                "https://feeds.feedburner.com/oreilly/radar",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_items_per_feed: 15,
            enrich_first: 5,
            vote_scrape_hosts: vec!["producthunt.com".to_string()],
            min_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("no vote button on page")]
    MissingVotes,
    #[error("vote text {0:?} is not a count")]
    Unparseable(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Flattens markup to its text content with collapsed whitespace.
pub fn strip_html(markup: &str) -> String {
    let fragment = Html::parse_fragment(markup);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn entry_to_candidate(entry: Entry, feed_url: &str, fetched_at: DateTime<Utc>) -> CandidateItem {
    let title = entry
        .title
        .map(|t| t.content)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let link = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();

    let source_id = if !entry.id.is_empty() {
        entry.id
    } else if !link.is_empty() {
        link.clone()
    } else {
        format!("{feed_url}-{title}")
    };

    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|markup| strip_html(&markup))
        .unwrap_or_default();

    CandidateItem {
        source_id,
        title,
        url: link,
        description,
        raw_metrics: RawMetrics {
            created_at: Some(entry.published.or(entry.updated).unwrap_or(fetched_at)),
            ..Default::default()
        },
    }
}

/// Feed parser that leaves a missing entry id empty, so `entry_to_candidate` can fall back to the link.
fn feed_parser() -> feed_rs::parser::Parser {
    feed_rs::parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
}

/// Parses raw feed bytes and normalizes up to `max_items` entries.
pub fn read_feed(
    bytes: &[u8],
    feed_url: &str,
    max_items: usize,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<CandidateItem>, AdapterError> {
    let feed = feed_parser()
        .parse(bytes)
        .map_err(|e| AdapterError::parse(feed_url, e))?;
    Ok(parse_feed(feed, feed_url, max_items, fetched_at))
}

pub fn parse_feed(
    feed: Feed,
    feed_url: &str,
    max_items: usize,
    fetched_at: DateTime<Utc>,
) -> Vec<CandidateItem> {
    feed.entries
        .into_iter()
        .take(max_items)
        .map(|entry| entry_to_candidate(entry, feed_url, fetched_at))
        .collect()
}

/// Reads the first vote button on the page. Leading digits count, like `"128 upvotes"`.
pub fn scrape_vote_count(html: &str) -> Result<u64, EnrichmentError> {
    let selector = Selector::parse(VOTE_BUTTON_SELECTOR)
        .map_err(|e| AdapterError::parse("vote selector", e))?;
    let document = Html::parse_document(html);
    let button = document
        .select(&selector)
        .next()
        .ok_or(EnrichmentError::MissingVotes)?;
    let text: String = button.text().collect();
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse()
        .map_err(|_| EnrichmentError::Unparseable(text.trim().to_string()))
}

pub struct RssAdapter {
    config: RssConfig,
    pacer: Box<dyn Pacer>,
}

impl RssAdapter {
    pub fn new(config: RssConfig) -> Self {
        let pacer = interval_pacer(config.min_interval_ms);
        Self { config, pacer }
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    fn wants_votes(&self, url: &str) -> bool {
        !url.is_empty() && self.config.vote_scrape_hosts.iter().any(|host| url.contains(host.as_str()))
    }

    async fn fetch_feed(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        feed_url: &str,
    ) -> Result<Vec<CandidateItem>, AdapterError> {
        self.pacer.ready().await;
        let response = http
            .fetch_bytes(ctx.run_id, Source::Rss.as_str(), feed_url, &[])
            .await
            .map_err(|e| AdapterError::fetch(feed_url, e))?;
        read_feed(&response.body, feed_url, self.config.max_items_per_feed, ctx.fetched_at)
    }

    async fn scrape_votes(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        url: &str,
    ) -> Result<u64, EnrichmentError> {
        let response = http
            .fetch_bytes(ctx.run_id, "rss-enrichment", url, &[("User-Agent", BROWSER_USER_AGENT)])
            .await
            .map_err(|e| AdapterError::fetch(url, e))?;
        scrape_vote_count(&String::from_utf8_lossy(&response.body))
    }

    async fn enrich(&self, http: &HttpFetcher, ctx: &AdapterContext, items: &mut [CandidateItem]) {
        let limit = self.config.enrich_first.min(items.len());
        for item in &mut items[..limit] {
            if !self.wants_votes(&item.url) {
                continue;
            }
            let votes = match self.scrape_votes(http, ctx, &item.url).await {
                Ok(votes) => votes,
                Err(err) => {
                    tracing::debug!(url = %item.url, error = %err, "vote enrichment failed; counting zero");
                    0
                }
            };
            item.raw_metrics.upvotes = Some(votes);
        }
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn source(&self) -> Source {
        Source::Rss
    }

    async fn fetch(&self, http: &HttpFetcher, ctx: &AdapterContext) -> FetchReport {
        let mut report = FetchReport::default();
        for feed_url in &self.config.feeds {
            match self.fetch_feed(http, ctx, feed_url).await {
                Ok(mut items) => {
                    self.enrich(http, ctx, &mut items).await;
                    tracing::debug!(url = %feed_url, count = items.len(), "feed fetched");
                    report.items.extend(items);
                }
                Err(err) => report.record_error(&Source::Rss, &err),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use chrono::TimeZone;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    fn fixture_items(max_items: usize) -> Vec<CandidateItem> {
        let xml = String::from_utf8(fixture("rss/feed.xml"))
            .expect("utf8 feed")
            .replace("{{base}}", "http://feeds.test");
        read_feed(xml.as_bytes(), "http://feeds.test/feed.xml", max_items, fetched_at())
            .expect("fixture feed parses")
    }

    #[test]
    fn feed_entries_normalize_with_fallbacks() {
        let items = fixture_items(15);
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].source_id, "launch-0001");
        assert_eq!(items[0].url, "http://feeds.test/posts/vector-notes");
        assert_eq!(items[0].description, "A tiny vector database for notes.");
        assert_ne!(items[0].raw_metrics.created_at, Some(fetched_at()));

        assert_eq!(items[2].source_id, "http://feeds.test/posts/undated");
        assert_eq!(items[2].raw_metrics.created_at, Some(fetched_at()));
        assert_eq!(items[2].raw_metrics.upvotes, None);
    }

    #[test]
    fn guidless_item_is_keyed_by_link_then_title() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Blog</title>
  <item><title>No guid here</title><link>https://blog.test/post-1</link></item>
  <item><title>Nothing but a title</title></item>
</channel></rss>"#;
        let items = read_feed(xml.as_bytes(), "https://blog.test/rss", 15, fetched_at())
            .expect("feed parses");
        assert_eq!(items[0].source_id, "https://blog.test/post-1");
        assert_eq!(items[0].url, "https://blog.test/post-1");
        assert_eq!(items[1].source_id, "https://blog.test/rss-Nothing but a title");
    }

    #[test]
    fn feed_is_cut_to_the_item_limit() {
        assert_eq!(fixture_items(2).len(), 2);
    }

    #[test]
    fn malformed_feed_is_a_parse_error() {
        let err = read_feed(b"not a feed", "https://blog.test/rss", 15, fetched_at())
            .expect_err("garbage is rejected");
        assert!(matches!(err, AdapterError::Parse { .. }));
    }

    #[test]
    fn vote_button_scrape() {
        let html = String::from_utf8(fixture("producthunt/post.html")).expect("utf8 html");
        assert_eq!(scrape_vote_count(&html).expect("vote count"), 128);
        assert!(matches!(
            scrape_vote_count("<html><body><p>no votes</p></body></html>"),
            Err(EnrichmentError::MissingVotes)
        ));
        assert!(matches!(
            scrape_vote_count(r#"<button data-test="vote-button">Upvote</button>"#),
            Err(EnrichmentError::Unparseable(_))
        ));
    }

    #[test]
    fn strip_html_keeps_text_only() {
        assert_eq!(
            strip_html("<p>Hello <b>rising</b>\n  world</p>"),
            "Hello rising world"
        );
    }

    #[test]
    fn vote_scrape_is_limited_to_configured_hosts() {
        let adapter = RssAdapter::new(RssConfig::default());
        assert!(adapter.wants_votes("https://www.producthunt.com/posts/thing"));
        assert!(!adapter.wants_votes("https://dev.to/someone/post"));
        assert!(!adapter.wants_votes(""));
    }
}
