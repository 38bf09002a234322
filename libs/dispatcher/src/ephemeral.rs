//! Round-robin scheduler for ephemeral cluster jobs.
//!
//! Each new job takes the next cluster in the rotation. A job dispatched again
//! within the cache TTL gets the cluster it was given the first time, and
//! such cache hits do not advance the rotation. Expired entries are dropped
//! lazily, when the same job is dispatched again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::EphemeralError;
use crate::ClusterName;

/// How long a job keeps its cluster, measured from the assignment.
pub const CACHE_TTL_HOURS: i64 = 24;

/// Time source used to age cache entries.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
struct CacheEntry {
    cluster: ClusterName,
    assigned_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    clusters: Vec<ClusterName>,
    /// Index of the last assigned cluster; `None` before the first one.
    last: Option<usize>,
    cache: HashMap<String, CacheEntry>,
}

impl SchedulerState {
    fn advance(&mut self) -> usize {
        let next = match self.last {
            Some(last) => (last + 1) % self.clusters.len(),
            None => 0,
        };
        self.last = Some(next);
        next
    }
}

pub struct EphemeralScheduler {
    state: Mutex<SchedulerState>,
    clock: Clock,
    ttl: TimeDelta,
}

impl EphemeralScheduler {
    /// Create a scheduler over `clusters` using the wall clock.
    pub fn new(clusters: Vec<ClusterName>) -> Self {
        Self::with_clock(clusters, Arc::new(Utc::now))
    }

    pub fn with_clock(clusters: Vec<ClusterName>, clock: Clock) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                clusters,
                ..SchedulerState::default()
            }),
            clock,
            ttl: TimeDelta::hours(CACHE_TTL_HOURS),
        }
    }

    /// Pick the cluster for `job`.
    pub fn dispatch(&self, job: &str) -> Result<ClusterName, EphemeralError> {
        let mut state = self.state.lock();
        if state.clusters.is_empty() {
            return Err(EphemeralError::NoClusterAvailable);
        }

        let now = (self.clock)();
        if let Some(entry) = state.cache.get(job) {
            if now - entry.assigned_at <= self.ttl {
                debug!(job = %job, cluster = %entry.cluster, "Reusing ephemeral cluster assignment");
                return Ok(entry.cluster.clone());
            }
            state.cache.remove(job);
        }

        let idx = state.advance();
        let cluster = state.clusters[idx].clone();
        state.cache.insert(
            job.to_string(),
            CacheEntry {
                cluster: cluster.clone(),
                assigned_at: now,
            },
        );
        debug!(job = %job, cluster = %cluster, "Assigned ephemeral cluster");
        Ok(cluster)
    }

    /// Replace the candidate clusters and start a new rotation.
    ///
    /// Every cached assignment is dropped, expired or not.
    pub fn reset(&self, clusters: Vec<ClusterName>) {
        let mut state = self.state.lock();
        debug!(
            clusters = ?clusters,
            dropped_assignments = state.cache.len(),
            "Resetting ephemeral scheduler"
        );
        state.clusters = clusters;
        state.last = None;
        state.cache.clear();
    }

    pub fn clusters(&self) -> Vec<ClusterName> {
        self.state.lock().clusters.clone()
    }
}

impl std::fmt::Debug for EphemeralScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EphemeralScheduler")
            .field("clusters", &state.clusters)
            .field("last", &state.last)
            .field("cached", &state.cache.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
