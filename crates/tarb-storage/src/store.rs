//! Trend record repository contract and the in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tarb_core::{Clock, Source, TrendKey, TrendRecord};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer created the same identity first.
    #[error("duplicate trend record {key}")]
    Duplicate { key: String },
    #[error("transient store failure: {0}")]
    Transient(String),
    /// The backing store cannot be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterAssignment {
    pub key: TrendKey,
    pub cluster: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub per_source: BTreeMap<Source, usize>,
    pub top: Option<TrendRecord>,
}

#[async_trait]
pub trait TrendStore: Send + Sync {
    async fn find_by_source_and_id(
        &self,
        source: &Source,
        source_id: &str,
    ) -> Result<Option<TrendRecord>, StoreError>;

    /// Create-or-update by `(source, source_id)`.
    ///
    /// Refreshes `last_seen` from the store clock, sets `first_seen` only when the
    /// record is created, and never touches `cluster`.
    async fn upsert(&self, record: TrendRecord) -> Result<TrendRecord, StoreError>;

    /// Every record in stable insertion order.
    async fn list_all(&self) -> Result<Vec<TrendRecord>, StoreError>;

    async fn list_top_by_score(&self, limit: usize) -> Result<Vec<TrendRecord>, StoreError>;

    async fn list_top_by_source(
        &self,
        source: &Source,
        limit: usize,
    ) -> Result<Vec<TrendRecord>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Replaces every record's cluster; records missing from `assignments` end up unclustered.
    async fn assign_clusters(&self, assignments: &[ClusterAssignment]) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Records {
    rows: Vec<TrendRecord>,
    index: HashMap<TrendKey, usize>,
}

pub struct InMemoryTrendStore {
    clock: Arc<dyn Clock>,
    records: RwLock<Records>,
}

impl InMemoryTrendStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: RwLock::new(Records::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn top_by_score<'a>(rows: impl Iterator<Item = &'a TrendRecord>, limit: usize) -> Vec<TrendRecord> {
    let mut rows: Vec<TrendRecord> = rows.cloned().collect();
    rows.sort_by(|a, b| b.rising_score.total_cmp(&a.rising_score));
    rows.truncate(limit);
    rows
}

#[async_trait]
impl TrendStore for InMemoryTrendStore {
    async fn find_by_source_and_id(
        &self,
        source: &Source,
        source_id: &str,
    ) -> Result<Option<TrendRecord>, StoreError> {
        let records = self.records.read().await;
        let key = TrendKey::new(source.clone(), source_id);
        Ok(records.index.get(&key).map(|&i| records.rows[i].clone()))
    }

    async fn upsert(&self, mut record: TrendRecord) -> Result<TrendRecord, StoreError> {
        let now = self.clock.now();
        let mut records = self.records.write().await;
        let key = record.key();

        record.last_seen = now;
        match records.index.get(&key).copied() {
            Some(i) => {
                let stored = &mut records.rows[i];
                record.first_seen = stored.first_seen;
                record.cluster = stored.cluster.clone();
                *stored = record.clone();
            }
            None => {
                record.first_seen = now;
                record.cluster = None;
                let position = records.rows.len();
                records.rows.push(record.clone());
                records.index.insert(key, position);
            }
        }
        Ok(record)
    }

    async fn list_all(&self) -> Result<Vec<TrendRecord>, StoreError> {
        Ok(self.records.read().await.rows.clone())
    }

    async fn list_top_by_score(&self, limit: usize) -> Result<Vec<TrendRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(top_by_score(records.rows.iter(), limit))
    }

    async fn list_top_by_source(
        &self,
        source: &Source,
        limit: usize,
    ) -> Result<Vec<TrendRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(top_by_score(
            records.rows.iter().filter(|r| &r.source == source),
            limit,
        ))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let records = self.records.read().await;
        let mut per_source: BTreeMap<Source, usize> = BTreeMap::new();
        for row in &records.rows {
            *per_source.entry(row.source.clone()).or_default() += 1;
        }
        Ok(StoreStats {
            total: records.rows.len(),
            per_source,
            top: top_by_score(records.rows.iter(), 1).into_iter().next(),
        })
    }

    async fn assign_clusters(&self, assignments: &[ClusterAssignment]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        for row in records.rows.iter_mut() {
            row.cluster = None;
        }
        for assignment in assignments {
            if let Some(&i) = records.index.get(&assignment.key) {
                records.rows[i].cluster = Some(assignment.cluster.clone());
            }
        }
        Ok(())
    }
}
