//! Postgres-backed [`TrendStore`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tarb_core::{Clock, RawMetrics, Source, TrendRecord};

use crate::store::{ClusterAssignment, StoreError, StoreStats, TrendStore};

const COLUMNS: &str = "source, source_id, title, url, description, upvotes, comments, stars, views, \
     item_created_at, rising_score, velocity, engagement, recency, keywords, cluster, first_seen, last_seen";

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgTrendStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgTrendStore {
    pub async fn connect(database_url: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        Ok(Self::from_pool(pool, clock))
    }

    pub fn from_pool(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running trend store migrations")
    }
}

pub fn classify_sqlx_error(err: sqlx::Error, key: Option<&str>) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Duplicate {
                key: key.unwrap_or("<unknown>").to_string(),
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_) => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Transient(err.to_string()),
    }
}

fn to_db_count(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

fn from_db_count(value: Option<i64>) -> Option<u64> {
    value.map(|v| u64::try_from(v).unwrap_or(0))
}

fn record_from_row(row: &PgRow) -> Result<TrendRecord, sqlx::Error> {
    let source: String = row.try_get("source")?;
    Ok(TrendRecord {
        source: Source::from(source),
        source_id: row.try_get("source_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        description: row.try_get("description")?,
        raw_metrics: RawMetrics {
            upvotes: from_db_count(row.try_get("upvotes")?),
            comments: from_db_count(row.try_get("comments")?),
            stars: from_db_count(row.try_get("stars")?),
            views: from_db_count(row.try_get("views")?),
            created_at: row.try_get::<Option<DateTime<Utc>>, _>("item_created_at")?,
        },
        rising_score: row.try_get("rising_score")?,
        velocity: row.try_get("velocity")?,
        engagement: row.try_get("engagement")?,
        recency: row.try_get("recency")?,
        keywords: row.try_get("keywords")?,
        cluster: row.try_get("cluster")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
    })
}

fn records_from_rows(rows: Vec<PgRow>) -> Result<Vec<TrendRecord>, StoreError> {
    rows.iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| classify_sqlx_error(e, None))
}

#[async_trait]
impl TrendStore for PgTrendStore {
    async fn find_by_source_and_id(
        &self,
        source: &Source,
        source_id: &str,
    ) -> Result<Option<TrendRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM trends WHERE source = $1 AND source_id = $2");
        let row = sqlx::query(&sql)
            .bind(source.as_str())
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(|e| classify_sqlx_error(e, None))
    }

    async fn upsert(&self, record: TrendRecord) -> Result<TrendRecord, StoreError> {
        let now = self.clock.now();
        let key = record.key().to_string();
        // first_seen is only written by the INSERT arm; cluster is never written here.
        let sql = format!(
            "INSERT INTO trends (source, source_id, title, url, description, upvotes, comments, stars, views, \
                 item_created_at, rising_score, velocity, engagement, recency, keywords, first_seen, last_seen) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16) \
             ON CONFLICT (source, source_id) DO UPDATE SET \
                 title = EXCLUDED.title, url = EXCLUDED.url, description = EXCLUDED.description, \
                 upvotes = EXCLUDED.upvotes, comments = EXCLUDED.comments, stars = EXCLUDED.stars, \
                 views = EXCLUDED.views, item_created_at = EXCLUDED.item_created_at, \
                 rising_score = EXCLUDED.rising_score, velocity = EXCLUDED.velocity, \
                 engagement = EXCLUDED.engagement, recency = EXCLUDED.recency, \
                 keywords = EXCLUDED.keywords, last_seen = EXCLUDED.last_seen \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(record.source.as_str())
            .bind(&record.source_id)
            .bind(&record.title)
            .bind(&record.url)
            .bind(&record.description)
            .bind(to_db_count(record.raw_metrics.upvotes))
            .bind(to_db_count(record.raw_metrics.comments))
            .bind(to_db_count(record.raw_metrics.stars))
            .bind(to_db_count(record.raw_metrics.views))
            .bind(record.raw_metrics.created_at)
            .bind(record.rising_score)
            .bind(record.velocity)
            .bind(record.engagement)
            .bind(record.recency)
            .bind(&record.keywords)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, Some(&key)))?;
        record_from_row(&row).map_err(|e| classify_sqlx_error(e, Some(&key)))
    }

    async fn list_all(&self) -> Result<Vec<TrendRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM trends ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        records_from_rows(rows)
    }

    async fn list_top_by_score(&self, limit: usize) -> Result<Vec<TrendRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM trends ORDER BY rising_score DESC, id ASC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        records_from_rows(rows)
    }

    async fn list_top_by_source(
        &self,
        source: &Source,
        limit: usize,
    ) -> Result<Vec<TrendRecord>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM trends WHERE source = $1 ORDER BY rising_score DESC, id ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(source.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        records_from_rows(rows)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let rows = sqlx::query("SELECT source, COUNT(*) AS n FROM trends GROUP BY source")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        let mut per_source = BTreeMap::new();
        let mut total = 0usize;
        for row in rows {
            let source: String = row.try_get("source").map_err(|e| classify_sqlx_error(e, None))?;
            let n: i64 = row.try_get("n").map_err(|e| classify_sqlx_error(e, None))?;
            let n = usize::try_from(n).unwrap_or(0);
            total += n;
            per_source.insert(Source::from(source), n);
        }
        let top = self.list_top_by_score(1).await?.into_iter().next();
        Ok(StoreStats {
            total,
            per_source,
            top,
        })
    }

    async fn assign_clusters(&self, assignments: &[ClusterAssignment]) -> Result<(), StoreError> {
        let mut sources = Vec::with_capacity(assignments.len());
        let mut source_ids = Vec::with_capacity(assignments.len());
        let mut clusters = Vec::with_capacity(assignments.len());
        for a in assignments {
            sources.push(a.key.source.as_str().to_string());
            source_ids.push(a.key.source_id.clone());
            clusters.push(a.cluster.clone());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        sqlx::query("UPDATE trends SET cluster = NULL WHERE cluster IS NOT NULL")
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(e, None))?;
        sqlx::query(
            "UPDATE trends AS t SET cluster = a.cluster \
             FROM UNNEST($1::text[], $2::text[], $3::text[]) AS a(source, source_id, cluster) \
             WHERE t.source = a.source AND t.source_id = a.source_id",
        )
        .bind(&sources)
        .bind(&source_ids)
        .bind(&clusters)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_sqlx_error(e, None))?;
        tx.commit().await.map_err(|e| classify_sqlx_error(e, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_fatal_and_row_errors_are_not() {
        assert!(classify_sqlx_error(sqlx::Error::PoolTimedOut, None).is_fatal());
        assert!(classify_sqlx_error(sqlx::Error::PoolClosed, None).is_fatal());
        let row_err = classify_sqlx_error(sqlx::Error::RowNotFound, Some("reddit:abc"));
        assert!(matches!(row_err, StoreError::Transient(_)));
    }

    #[test]
    fn counters_clamp_across_signedness() {
        assert_eq!(to_db_count(Some(u64::MAX)), Some(i64::MAX));
        assert_eq!(to_db_count(None), None);
        assert_eq!(from_db_count(Some(-3)), Some(0));
        assert_eq!(from_db_count(Some(12)), Some(12));
    }
}
