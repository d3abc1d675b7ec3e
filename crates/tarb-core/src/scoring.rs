//! Rising-score computation.
//!
//! `rising = 0.4 * velocity + 0.3 * recency + 0.3 * engagement`. Velocity dominates so items
//! that are still accelerating surface ahead of large but settled ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RawMetrics, Source, TrendRecord};

pub const VELOCITY_WEIGHT: f64 = 0.4;
pub const RECENCY_WEIGHT: f64 = 0.3;
pub const ENGAGEMENT_WEIGHT: f64 = 0.3;
pub const VELOCITY_CAP: f64 = 100.0;
pub const COLD_START_VELOCITY_FACTOR: f64 = 0.5;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub rising_score: f64,
    pub velocity: f64,
    pub engagement: f64,
    pub recency: f64,
}

/// Maps a source's raw counters onto a log-compressed engagement scalar.
pub trait EngagementFormula: Send + Sync {
    fn engagement(&self, metrics: &RawMetrics) -> f64;
}

fn log_term(value: Option<u64>, weight: f64) -> f64 {
    (value.unwrap_or(0) as f64).ln_1p() * weight
}

/// Vote + comment driven sources.
#[derive(Debug, Clone, Copy)]
pub struct ForumEngagement {
    pub upvote_weight: f64,
    pub comment_weight: f64,
}

impl EngagementFormula for ForumEngagement {
    fn engagement(&self, metrics: &RawMetrics) -> f64 {
        log_term(metrics.upvotes, self.upvote_weight) + log_term(metrics.comments, self.comment_weight)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RepositoryEngagement {
    pub star_weight: f64,
}

impl EngagementFormula for RepositoryEngagement {
    fn engagement(&self, metrics: &RawMetrics) -> f64 {
        log_term(metrics.stars, self.star_weight)
    }
}

/// Feeds only carry the optionally scraped vote count.
#[derive(Debug, Clone, Copy)]
pub struct FeedEngagement {
    pub vote_weight: f64,
}

impl EngagementFormula for FeedEngagement {
    fn engagement(&self, metrics: &RawMetrics) -> f64 {
        log_term(metrics.upvotes, self.vote_weight)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoEngagement;

impl EngagementFormula for NoEngagement {
    fn engagement(&self, _metrics: &RawMetrics) -> f64 {
        0.0
    }
}

static REDDIT_ENGAGEMENT: ForumEngagement = ForumEngagement {
    upvote_weight: 10.0,
    comment_weight: 5.0,
};
static HACKERNEWS_ENGAGEMENT: ForumEngagement = ForumEngagement {
    upvote_weight: 12.0,
    comment_weight: 6.0,
};
static GITHUB_ENGAGEMENT: RepositoryEngagement = RepositoryEngagement { star_weight: 15.0 };
static RSS_ENGAGEMENT: FeedEngagement = FeedEngagement { vote_weight: 8.0 };
static NO_ENGAGEMENT: NoEngagement = NoEngagement;

impl Source {
    pub fn engagement_formula(&self) -> &'static dyn EngagementFormula {
        match self {
            Source::Reddit => &REDDIT_ENGAGEMENT,
            Source::HackerNews => &HACKERNEWS_ENGAGEMENT,
            Source::GitHub => &GITHUB_ENGAGEMENT,
            Source::Rss => &RSS_ENGAGEMENT,
            Source::Unrecognized(_) => &NO_ENGAGEMENT,
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// `100 / (age_hours + 1)`, with future timestamps treated as age zero.
pub fn recency(age_hours: f64) -> f64 {
    100.0 / (age_hours.max(0.0) + 1.0)
}

/// Engagement growth per hour since the previous sighting, or the cold-start proxy.
///
/// `previous` is `(previous_engagement, hours_since_previous_sighting)`.
pub fn velocity(engagement: f64, previous: Option<(f64, f64)>) -> f64 {
    let raw = match previous {
        Some((_, hours)) if hours <= 0.0 => 0.0,
        Some((previous_engagement, hours)) => ((engagement - previous_engagement) / hours).max(0.0),
        None => engagement * COLD_START_VELOCITY_FACTOR,
    };
    raw.clamp(0.0, VELOCITY_CAP)
}

pub fn rising_score(velocity: f64, recency: f64, engagement: f64) -> f64 {
    round2(velocity * VELOCITY_WEIGHT + recency * RECENCY_WEIGHT + engagement * ENGAGEMENT_WEIGHT)
}

/// Scores `record` (already merged with the current sighting) against the previously stored snapshot.
pub fn score(record: &TrendRecord, previous: Option<&TrendRecord>, now: DateTime<Utc>) -> Scores {
    let engagement = record.source.engagement_formula().engagement(&record.raw_metrics);

    let created_at = record.raw_metrics.created_at.unwrap_or(record.first_seen);
    let recency = recency(hours_between(created_at, now));

    let velocity = velocity(
        engagement,
        previous.map(|prev| (prev.engagement, hours_between(prev.last_seen, now))),
    );

    Scores {
        rising_score: rising_score(velocity, recency, engagement),
        velocity: round2(velocity),
        engagement: round2(engagement),
        recency: round2(recency),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CandidateItem, SourcedCandidate};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp")
    }

    fn record(source: Source, metrics: RawMetrics) -> TrendRecord {
        let candidate = SourcedCandidate {
            source,
            item: CandidateItem {
                source_id: "x".into(),
                title: "t".into(),
                url: "u".into(),
                description: String::new(),
                raw_metrics: metrics,
            },
        };
        TrendRecord::from_sighting(None, &candidate, Vec::new(), now())
    }

    fn forum(upvotes: u64, comments: u64) -> RawMetrics {
        RawMetrics {
            upvotes: Some(upvotes),
            comments: Some(comments),
            ..Default::default()
        }
    }

    #[test]
    fn per_source_engagement_weights() {
        let m = RawMetrics {
            upvotes: Some(99),
            comments: Some(9),
            stars: Some(99),
            ..Default::default()
        };
        let ln100 = 100f64.ln();
        let ln10 = 10f64.ln();
        assert!((Source::Reddit.engagement_formula().engagement(&m) - (ln100 * 10.0 + ln10 * 5.0)).abs() < 1e-9);
        assert!((Source::HackerNews.engagement_formula().engagement(&m) - (ln100 * 12.0 + ln10 * 6.0)).abs() < 1e-9);
        assert!((Source::GitHub.engagement_formula().engagement(&m) - ln100 * 15.0).abs() < 1e-9);
        assert!((Source::Rss.engagement_formula().engagement(&m) - ln100 * 8.0).abs() < 1e-9);
    }

    #[test]
    fn unrecognized_source_scores_zero_engagement() {
        let r = record(Source::from("lobsters"), forum(500, 80));
        let scores = score(&r, None, now());
        assert_eq!(scores.engagement, 0.0);
        assert_eq!(scores.velocity, 0.0);
        assert_eq!(scores.recency, 100.0);
        assert_eq!(scores.rising_score, 30.0);
    }

    #[test]
    fn engagement_and_recency_stay_in_range() {
        for (up, com) in [(0, 0), (1, 0), (10_000, 3), (u64::MAX / 2, 7)] {
            for age in [0i64, 1, 5, 48, 10_000] {
                let mut m = forum(up, com);
                m.created_at = Some(now() - Duration::hours(age));
                let scores = score(&record(Source::Reddit, m), None, now());
                assert!(scores.engagement >= 0.0);
                assert!(scores.recency > 0.0 && scores.recency <= 100.0);
            }
        }
    }

    #[test]
    fn recency_decreases_with_age_and_falls_back_to_first_seen() {
        assert_eq!(recency(0.0), 100.0);
        assert_eq!(recency(1.0), 50.0);
        assert!(recency(2.0) < recency(1.5));
        assert_eq!(recency(-4.0), 100.0);

        let r = record(Source::GitHub, RawMetrics::default());
        let later = now() + Duration::hours(3);
        assert_eq!(score(&r, None, later).recency, 25.0);
    }

    #[test]
    fn cold_start_velocity_is_half_engagement_capped() {
        let r = record(Source::HackerNews, forum(40, 12));
        let scores = score(&r, None, now());
        let engagement = Source::HackerNews.engagement_formula().engagement(&r.raw_metrics);
        assert_eq!(scores.velocity, round2((engagement * 0.5).min(100.0)));

        let huge = record(Source::GitHub, RawMetrics { stars: Some(u64::MAX / 4), ..Default::default() });
        assert_eq!(score(&huge, None, now()).velocity, 100.0);
    }

    #[test]
    fn warm_velocity_is_engagement_growth_per_hour() {
        let mut previous = record(Source::Reddit, forum(10, 1));
        previous.engagement = 10.0;
        previous.last_seen = now() - Duration::hours(2);

        let current = record(Source::Reddit, forum(200, 30));
        let engagement = Source::Reddit.engagement_formula().engagement(&current.raw_metrics);
        let scores = score(&current, Some(&previous), now());
        assert_eq!(scores.velocity, round2(((engagement - 10.0) / 2.0).max(0.0).min(100.0)));
    }

    #[test]
    fn shrinking_engagement_has_zero_velocity() {
        let mut previous = record(Source::Reddit, forum(10, 1));
        previous.engagement = 90.0;
        previous.last_seen = now() - Duration::minutes(30);
        let current = record(Source::Reddit, forum(2, 0));
        assert_eq!(score(&current, Some(&previous), now()).velocity, 0.0);
    }

    #[test]
    fn same_instant_resighting_contributes_no_velocity() {
        let mut previous = record(Source::Reddit, forum(1, 0));
        previous.last_seen = now();
        let current = record(Source::Reddit, forum(5_000, 400));
        let scores = score(&current, Some(&previous), now());
        assert_eq!(scores.velocity, 0.0);
        assert_eq!(scores.rising_score, rising_score(0.0, 100.0, Source::Reddit.engagement_formula().engagement(&current.raw_metrics)));
    }

    #[test]
    fn rising_score_is_weighted_sum_rounded() {
        for (v, r, e) in [(0.0, 100.0, 0.0), (12.345, 33.333, 46.05), (100.0, 0.5, 87.4)] {
            assert_eq!(rising_score(v, r, e), round2(0.4 * v + 0.3 * r + 0.3 * e));
        }
        assert_eq!(rising_score(10.0, 50.0, 20.0), 25.0);
    }

    #[test]
    fn components_are_rounded_to_two_decimals() {
        let mut m = forum(7, 3);
        m.created_at = Some(now() - Duration::minutes(97));
        let scores = score(&record(Source::Reddit, m), None, now());
        for value in [scores.rising_score, scores.velocity, scores.engagement, scores.recency] {
            assert_eq!(value, round2(value));
        }
    }
}
