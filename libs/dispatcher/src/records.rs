//! Historical job-to-cluster assignments.
//!
//! The table is produced by a full reconciliation pass and replaced
//! wholesale by the next one. Readers always get owned copies.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ClusterName;

/// Where a job was last dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub cluster: ClusterName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl JobRecord {
    pub fn new(cluster: impl Into<ClusterName>) -> Self {
        Self {
            cluster: cluster.into(),
            capabilities: Vec::new(),
        }
    }
}

pub type RecordMap = HashMap<String, JobRecord>;

/// Assignment table owned by the reconciliation process.
///
/// Uses ArcSwap so lookups never block on a regeneration in progress.
pub struct JobRecords {
    snapshot: ArcSwap<RecordMap>,
}

impl JobRecords {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RecordMap::new()),
        }
    }

    /// Replace every record in one atomic swap.
    pub fn regenerate(&self, records: RecordMap) {
        let record_count = records.len();
        self.snapshot.store(Arc::new(records));
        info!(record_count = record_count, "Job records regenerated");
    }

    /// Copy of the whole table.
    pub fn get_copy(&self) -> RecordMap {
        RecordMap::clone(&self.snapshot.load())
    }

    pub fn get(&self, job: &str) -> Option<JobRecord> {
        self.snapshot.load().get(job).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

impl Default for JobRecords {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(entries: &[(&str, &str)]) -> RecordMap {
        entries
            .iter()
            .map(|(job, cluster)| (job.to_string(), JobRecord::new(*cluster)))
            .collect()
    }

    #[test]
    fn test_regenerate_replaces_everything() {
        let table = JobRecords::new();
        assert!(table.is_empty());

        table.regenerate(records(&[("a", "build01"), ("b", "build02")]));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a"), Some(JobRecord::new("build01")));

        table.regenerate(records(&[("c", "build03")]));
        assert_eq!(table.len(), 1);
        assert!(table.get("a").is_none());
        assert_eq!(table.get("c").unwrap().cluster, "build03");
    }

    #[test]
    fn test_copy_is_detached_from_table() {
        let table = JobRecords::new();
        table.regenerate(records(&[("a", "build01")]));

        let mut copy = table.get_copy();
        copy.insert("b".to_string(), JobRecord::new("build02"));
        copy.get_mut("a").unwrap().cluster = "build09".to_string();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("a").unwrap().cluster, "build01");
    }
}
