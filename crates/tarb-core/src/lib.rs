//! Core domain model for trend arbitrage: sources, candidates, canonical trend records.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub mod keywords;
pub mod scoring;

pub use keywords::extract_keywords;
pub use scoring::{score, EngagementFormula, Scores};

/// Upstream a candidate was fetched from.
///
/// Parsing never fails: strings that name no known source land in
/// `Unrecognized`, which scores zero engagement rather than erroring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    Reddit,
    HackerNews,
    GitHub,
    Rss,
    Unrecognized(String),
}

impl Source {
    pub const KNOWN: [Source; 4] = [Source::Reddit, Source::HackerNews, Source::GitHub, Source::Rss];

    pub fn as_str(&self) -> &str {
        match self {
            Source::Reddit => "reddit",
            Source::HackerNews => "hackernews",
            Source::GitHub => "github",
            Source::Rss => "rss",
            Source::Unrecognized(other) => other,
        }
    }
}

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "reddit" => Source::Reddit,
            "hackernews" => Source::HackerNews,
            "github" => Source::GitHub,
            "rss" => Source::Rss,
            _ => Source::Unrecognized(value.to_string()),
        }
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        Source::from(value.as_str())
    }
}

impl From<Source> for String {
    fn from(value: Source) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-specific counters. `None` means the source did not report the value on this sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawMetrics {
    pub upvotes: Option<u64>,
    pub comments: Option<u64>,
    pub stars: Option<u64>,
    pub views: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RawMetrics {
    /// Fresh values win; anything this sighting did not report keeps the stored value.
    pub fn merged_onto(self, previous: &RawMetrics) -> RawMetrics {
        RawMetrics {
            upvotes: self.upvotes.or(previous.upvotes),
            comments: self.comments.or(previous.comments),
            stars: self.stars.or(previous.stars),
            views: self.views.or(previous.views),
            created_at: self.created_at.or(previous.created_at),
        }
    }
}

/// Normalized handoff contract from adapters into the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub raw_metrics: RawMetrics,
}

/// A candidate tagged with the source that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedCandidate {
    pub source: Source,
    pub item: CandidateItem,
}

impl SourcedCandidate {
    pub fn key(&self) -> TrendKey {
        TrendKey::new(self.source.clone(), self.item.source_id.clone())
    }
}

/// Identity of a trend record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrendKey {
    pub source: Source,
    pub source_id: String,
}

impl TrendKey {
    pub fn new(source: Source, source_id: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for TrendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.source_id)
    }
}

/// Canonical persisted trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub raw_metrics: RawMetrics,
    pub rising_score: f64,
    pub velocity: f64,
    pub engagement: f64,
    pub recency: f64,
    pub keywords: Vec<String>,
    pub cluster: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl TrendRecord {
    pub fn key(&self) -> TrendKey {
        TrendKey::new(self.source.clone(), self.source_id.clone())
    }

    /// Folds a fresh sighting onto the stored record, or starts a new one at `now`.
    ///
    /// Derived score fields are carried over untouched; callers rescore with
    /// [`scoring::score`] and [`TrendRecord::apply_scores`]. `last_seen` is left for
    /// the store to refresh on upsert.
    pub fn from_sighting(
        previous: Option<&TrendRecord>,
        candidate: &SourcedCandidate,
        keywords: Vec<String>,
        now: DateTime<Utc>,
    ) -> TrendRecord {
        let item = &candidate.item;
        match previous {
            Some(prev) => {
                let mut next = prev.clone();
                next.title = item.title.clone();
                next.url = item.url.clone();
                if !item.description.is_empty() {
                    next.description = item.description.clone();
                }
                next.raw_metrics = item.raw_metrics.merged_onto(&prev.raw_metrics);
                next.keywords = keywords;
                next
            }
            None => TrendRecord {
                source: candidate.source.clone(),
                source_id: item.source_id.clone(),
                title: item.title.clone(),
                url: item.url.clone(),
                description: item.description.clone(),
                raw_metrics: item.raw_metrics,
                rising_score: 0.0,
                velocity: 0.0,
                engagement: 0.0,
                recency: 0.0,
                keywords,
                cluster: None,
                first_seen: now,
                last_seen: now,
            },
        }
    }

    pub fn apply_scores(&mut self, scores: Scores) {
        self.rising_score = scores.rising_score;
        self.velocity = scores.velocity;
        self.engagement = scores.engagement;
        self.recency = scores.recency;
    }
}

/// Source of "now" for scoring and store timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, 0, 0).single().expect("valid timestamp")
    }

    fn candidate(description: &str, metrics: RawMetrics) -> SourcedCandidate {
        SourcedCandidate {
            source: Source::Rss,
            item: CandidateItem {
                source_id: "guid-1".into(),
                title: "Fresh title".into(),
                url: "https://example.com/a".into(),
                description: description.into(),
                raw_metrics: metrics,
            },
        }
    }

    #[test]
    fn source_round_trips_known_slugs_and_keeps_unknown_text() {
        for source in Source::KNOWN {
            assert_eq!(Source::from(source.as_str()), source);
        }
        assert_eq!(Source::from("HackerNews"), Source::HackerNews);
        assert_eq!(
            Source::from("mastodon"),
            Source::Unrecognized("mastodon".into())
        );
        let json = serde_json::to_string(&Source::GitHub).expect("serialize source");
        assert_eq!(json, "\"github\"");
    }

    #[test]
    fn merge_keeps_unreported_metrics() {
        let previous = RawMetrics {
            upvotes: Some(40),
            comments: Some(3),
            ..Default::default()
        };
        let fresh = RawMetrics {
            comments: Some(9),
            ..Default::default()
        };
        let merged = fresh.merged_onto(&previous);
        assert_eq!(merged.upvotes, Some(40));
        assert_eq!(merged.comments, Some(9));
    }

    #[test]
    fn new_sighting_sets_first_and_last_seen() {
        let record = TrendRecord::from_sighting(
            None,
            &candidate("desc", RawMetrics::default()),
            vec!["fresh".into(), "title".into()],
            ts(10),
        );
        assert_eq!(record.first_seen, ts(10));
        assert_eq!(record.last_seen, ts(10));
        assert_eq!(record.cluster, None);
        assert_eq!(record.key(), TrendKey::new(Source::Rss, "guid-1"));
    }

    #[test]
    fn resighting_refreshes_content_but_not_identity_or_cluster() {
        let mut stored = TrendRecord::from_sighting(
            None,
            &candidate("old description", RawMetrics::default()),
            vec!["old".into()],
            ts(1),
        );
        stored.cluster = Some("cluster-3".into());
        stored.title = "Old title".into();

        let next = TrendRecord::from_sighting(
            Some(&stored),
            &candidate("", RawMetrics { upvotes: Some(5), ..Default::default() }),
            vec!["fresh".into()],
            ts(5),
        );
        assert_eq!(next.title, "Fresh title");
        assert_eq!(next.description, "old description");
        assert_eq!(next.keywords, vec!["fresh".to_string()]);
        assert_eq!(next.first_seen, ts(1));
        assert_eq!(next.cluster.as_deref(), Some("cluster-3"));
        assert_eq!(next.raw_metrics.upvotes, Some(5));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(ts(0));
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now(), ts(3));
    }
}
