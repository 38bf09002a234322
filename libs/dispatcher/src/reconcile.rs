//! Full reconciliation of job assignments.
//!
//! A pass resolves every job in the inventory, arbitrates the result against
//! the job's previous cluster and builds a fresh [`RecordMap`] meant to
//! replace the previous one wholesale. Jobs that fail to resolve are reported
//! and left out of the new table; they do not abort the pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cluster::{BlockedSet, ClusterMap};
use crate::config::Config;
use crate::error::ResolveError;
use crate::job::{Container, JobBase};
use crate::records::{JobRecord, RecordMap};
use crate::target::determine_target_cluster;
use crate::{CloudProvider, ClusterName};

/// Volume of a job with no recorded history.
pub const DEFAULT_JOB_VOLUME: f64 = 1.0;

/// A job together with the repository path of the file defining it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawJobEntry")]
pub struct JobEntry {
    #[serde(flatten)]
    pub job: JobBase,
    pub path: String,
    /// Relative load the job puts on its cluster, e.g. runs per day.
    pub volume: f64,
}

impl JobEntry {
    pub fn new(job: JobBase, path: impl Into<String>) -> Self {
        Self {
            job,
            path: path.into(),
            volume: DEFAULT_JOB_VOLUME,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }
}

// Not flattened: buffered label values would reject unquoted scalars
// such as `true`.
#[derive(Deserialize)]
struct RawJobEntry {
    name: String,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    containers: Vec<Container>,
    #[serde(default)]
    cluster: ClusterName,
    path: String,
    #[serde(default = "default_volume")]
    volume: f64,
}

fn default_volume() -> f64 {
    DEFAULT_JOB_VOLUME
}

impl From<RawJobEntry> for JobEntry {
    fn from(raw: RawJobEntry) -> Self {
        Self {
            job: JobBase {
                name: raw.name,
                agent: raw.agent,
                labels: raw.labels,
                containers: raw.containers,
                cluster: raw.cluster,
            },
            path: raw.path,
            volume: raw.volume,
        }
    }
}

/// A job that could not be assigned during a pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("job {job}: {source}")]
pub struct JobError {
    pub job: String,
    #[source]
    pub source: ResolveError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub jobs_seen: usize,
    pub jobs_assigned: usize,
    /// Jobs run by an agent this dispatcher does not handle.
    pub jobs_skipped: usize,
    pub jobs_failed: usize,
    /// Jobs whose cluster differs from their previous one.
    pub jobs_moved: usize,
    /// Jobs placed on a cluster lacking a capability they require.
    pub capability_mismatches: usize,
    pub per_cluster: BTreeMap<ClusterName, usize>,
    pub per_provider: BTreeMap<CloudProvider, usize>,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub records: RecordMap,
    pub stats: ReconcileStats,
    pub errors: Vec<JobError>,
}

/// Inputs shared by every job of one pass.
pub struct Reconciler<'a> {
    config: &'a Config,
    clusters: &'a ClusterMap,
    blocked: &'a BlockedSet,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a Config, clusters: &'a ClusterMap, blocked: &'a BlockedSet) -> Self {
        Self {
            config,
            clusters,
            blocked,
        }
    }

    /// Compute the assignment of every job in `jobs`.
    #[instrument(skip_all, fields(job_count = jobs.len()))]
    pub fn reconcile(&self, previous: &RecordMap, jobs: &[JobEntry]) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for entry in jobs {
            outcome.stats.jobs_seen += 1;
            let job = &entry.job;

            let resolution = match self.config.determine_cluster_for_job(job, &entry.path) {
                Ok(Some(resolution)) => resolution,
                Ok(None) => {
                    outcome.stats.jobs_skipped += 1;
                    continue;
                }
                Err(source) => {
                    warn!(job = %job.name, error = %source, "Failed to resolve cluster for job");
                    outcome.stats.jobs_failed += 1;
                    outcome.errors.push(JobError {
                        job: job.name.clone(),
                        source,
                    });
                    continue;
                }
            };

            let previous_cluster = previous
                .get(&job.name)
                .map(|record| record.cluster.as_str())
                .unwrap_or(job.cluster.as_str());

            let target = determine_target_cluster(
                previous_cluster,
                &resolution.cluster,
                &self.config.default,
                resolution.may_be_relocated,
                self.blocked,
            );

            if !previous_cluster.is_empty() && previous_cluster != target {
                debug!(
                    job = %job.name,
                    from = %previous_cluster,
                    to = %target,
                    "Job moves to a different cluster"
                );
                outcome.stats.jobs_moved += 1;
            }

            let capabilities = job.required_capabilities();
            let missing = self.missing_capabilities(target, &capabilities);
            if !missing.is_empty() {
                warn!(
                    job = %job.name,
                    cluster = %target,
                    missing = ?missing,
                    "Cluster lacks capabilities required by job"
                );
                outcome.stats.capability_mismatches += 1;
            }

            *outcome
                .stats
                .per_cluster
                .entry(target.to_string())
                .or_default() += 1;
            if let Some(provider) = self.provider_of(target) {
                *outcome
                    .stats
                    .per_provider
                    .entry(provider.clone())
                    .or_default() += 1;
            }

            outcome.stats.jobs_assigned += 1;
            outcome.records.insert(
                job.name.clone(),
                JobRecord {
                    cluster: target.to_string(),
                    capabilities,
                },
            );
        }

        info!(
            jobs_seen = outcome.stats.jobs_seen,
            jobs_assigned = outcome.stats.jobs_assigned,
            jobs_skipped = outcome.stats.jobs_skipped,
            jobs_failed = outcome.stats.jobs_failed,
            jobs_moved = outcome.stats.jobs_moved,
            "Reconciliation pass complete"
        );

        outcome
    }

    fn missing_capabilities<'c>(&self, cluster: &str, required: &'c [String]) -> Vec<&'c str> {
        let info = self.clusters.get(cluster);
        required
            .iter()
            .filter(|capability| !info.is_some_and(|info| info.has_capability(capability)))
            .map(String::as_str)
            .collect()
    }

    fn provider_of(&self, cluster: &str) -> Option<&'a CloudProvider> {
        self.config
            .is_in_build_farm(cluster)
            .or_else(|| self.clusters.get(cluster).map(|info| &info.provider))
    }
}
