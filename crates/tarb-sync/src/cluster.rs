//! Greedy keyword-overlap clustering over the stored trend set.

use std::collections::BTreeSet;

use serde::Serialize;
use tarb_core::{TrendKey, TrendRecord};
use tarb_storage::ClusterAssignment;

pub const DEFAULT_MIN_OVERLAP: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub id: String,
    pub keywords: BTreeSet<String>,
    pub members: Vec<TrendKey>,
}

impl Cluster {
    /// Counts every keyword of the record found in the cluster, repeats included.
    fn overlap(&self, keywords: &[String]) -> usize {
        keywords.iter().filter(|k| self.keywords.contains(*k)).count()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterRun {
    pub assignments: Vec<ClusterAssignment>,
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterEngine {
    min_overlap: usize,
}

impl Default for ClusterEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_OVERLAP)
    }
}

impl ClusterEngine {
    pub fn new(min_overlap: usize) -> Self {
        Self { min_overlap }
    }

    /// Walks `records` in order; each joins the first existing cluster it overlaps enough, else
    /// seeds a new one. Ids restart at `cluster-0` on every call.
    pub fn assign(&self, records: &[TrendRecord]) -> ClusterRun {
        let mut run = ClusterRun::default();
        for record in records {
            let key = record.key();
            let joined = run
                .clusters
                .iter()
                .position(|c| c.overlap(&record.keywords) >= self.min_overlap);

            let cluster = match joined {
                Some(i) => {
                    let cluster = &mut run.clusters[i];
                    cluster.keywords.extend(record.keywords.iter().cloned());
                    cluster
                }
                None => {
                    let id = format!("cluster-{}", run.clusters.len());
                    run.clusters.push(Cluster {
                        id,
                        keywords: record.keywords.iter().cloned().collect(),
                        members: Vec::new(),
                    });
                    let last = run.clusters.len() - 1;
                    &mut run.clusters[last]
                }
            };
            cluster.members.push(key.clone());
            run.assignments.push(ClusterAssignment {
                key,
                cluster: cluster.id.clone(),
            });
        }
        run
    }
}
