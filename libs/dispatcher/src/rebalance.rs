//! Load-based placement of relocatable jobs on the build farm.
//!
//! Job files are handed out one at a time, in file name order, to the
//! eligible build farm cluster with the lowest volume relative to its
//! capacity. When the e2e tests of a file all target one cloud provider that
//! has an eligible cluster, only that provider's clusters are considered.
//!
//! A job pinned to another build farm cluster adds its volume there, not to
//! the cluster its file was given.
//! The plan is applied by rewriting every build farm group's paths as one
//! pattern per file name. Files already routed by a core path regex are
//! accounted for but never rewritten.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument};

use crate::cluster::{BlockedSet, ClusterMap, FULL_CAPACITY};
use crate::config::{Config, PathPattern};
use crate::error::ConfigError;
use crate::job::JobBase;
use crate::reconcile::JobEntry;
use crate::{CloudProvider, ClusterName};

/// Volume placed on one build farm cluster during a rebalance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLoad {
    pub provider: CloudProvider,
    /// Relative weight in (0, 100].
    pub capacity: u32,
    pub volume: f64,
}

impl ClusterLoad {
    /// Volume per unit of capacity.
    pub fn utilization(&self) -> f64 {
        self.volume / f64::from(self.capacity)
    }
}

/// Where every job file goes.
#[derive(Debug, Clone, Default)]
pub struct RebalancePlan {
    /// File name to cluster, for files the build farm paths will route.
    pub files: BTreeMap<String, ClusterName>,
    /// Files already routed by a core path regex.
    pub core_files: BTreeSet<String>,
    /// Eligible build farm clusters and the volume they ended up with.
    pub loads: BTreeMap<ClusterName, ClusterLoad>,
    /// Files placed on a cluster other than the one most of their jobs
    /// declare.
    pub files_moved: usize,
}

/// Regex routing every path whose file name is `file_name`.
pub fn file_pattern(file_name: &str) -> String {
    format!("(^|/){}$", regex::escape(file_name))
}

/// The cluster declared by most of `jobs`; ties go to the lexically first.
///
/// Jobs without a declared cluster are not counted.
pub fn most_used_cluster<'j>(jobs: impl IntoIterator<Item = &'j JobBase>) -> Option<&'j str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for job in jobs {
        if !job.cluster.is_empty() {
            *counts.entry(job.cluster.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .fold(None, |best, (cluster, count)| match best {
            Some((_, most)) if most >= count => best,
            _ => Some((cluster, count)),
        })
        .map(|(cluster, _)| cluster)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn least_loaded<'l>(
    loads: &'l BTreeMap<ClusterName, ClusterLoad>,
    provider: Option<&str>,
) -> Option<&'l ClusterName> {
    loads
        .iter()
        .filter(|(_, load)| provider.map_or(true, |p| load.provider == p))
        .fold(None, |best: Option<(&ClusterName, f64)>, (cluster, load)| {
            let utilization = load.utilization();
            match best {
                Some((_, lowest)) if lowest <= utilization => best,
                _ => Some((cluster, utilization)),
            }
        })
        .map(|(cluster, _)| cluster)
}

/// Inputs shared by every file of one rebalance.
pub struct Rebalancer<'a> {
    config: &'a Config,
    clusters: &'a ClusterMap,
    blocked: &'a BlockedSet,
}

impl<'a> Rebalancer<'a> {
    pub fn new(config: &'a Config, clusters: &'a ClusterMap, blocked: &'a BlockedSet) -> Self {
        Self {
            config,
            clusters,
            blocked,
        }
    }

    /// Place every job file of `jobs` on a build farm cluster.
    ///
    /// Files sharing a file name are placed together.
    #[instrument(skip_all, fields(job_count = jobs.len()))]
    pub fn rebalance(&self, jobs: &[JobEntry]) -> RebalancePlan {
        let mut plan = RebalancePlan {
            loads: self.eligible_clusters(),
            ..RebalancePlan::default()
        };
        if plan.loads.is_empty() {
            debug!("No eligible build farm cluster, nothing to rebalance");
            return plan;
        }

        let mut files: BTreeMap<&str, Vec<&JobEntry>> = BTreeMap::new();
        for entry in jobs {
            files.entry(file_name(&entry.path)).or_default().push(entry);
        }

        for (file, entries) in files {
            let affinity = self.provider_affinity(&entries, &plan.loads);
            let Some(cluster) = least_loaded(&plan.loads, affinity).cloned() else {
                continue;
            };

            for entry in &entries {
                self.add_volume(&mut plan.loads, &cluster, entry);
            }

            if most_used_cluster(entries.iter().map(|entry| &entry.job))
                .is_some_and(|declared| declared != cluster)
            {
                plan.files_moved += 1;
            }

            if entries
                .iter()
                .any(|entry| self.config.matching_path_regex(&entry.path))
            {
                plan.core_files.insert(file.to_string());
            } else {
                debug!(file = %file, cluster = %cluster, affinity = ?affinity, "Placed job file");
                plan.files.insert(file.to_string(), cluster);
            }
        }

        for (cluster, load) in &plan.loads {
            info!(
                cluster = %cluster,
                provider = %load.provider,
                capacity = load.capacity,
                volume = load.volume,
                "Dispatched volume on the cluster"
            );
        }

        plan
    }

    fn eligible_clusters(&self) -> BTreeMap<ClusterName, ClusterLoad> {
        self.config
            .build_farm
            .iter()
            .flat_map(|(provider, clusters)| clusters.keys().map(move |cluster| (provider, cluster)))
            .filter(|(_, cluster)| !self.blocked.contains(*cluster))
            .map(|(provider, cluster)| {
                let capacity = self
                    .clusters
                    .get(cluster)
                    .map_or(FULL_CAPACITY, |info| info.capacity);
                (
                    cluster.clone(),
                    ClusterLoad {
                        provider: provider.clone(),
                        capacity,
                        volume: 0.0,
                    },
                )
            })
            .collect()
    }

    /// The only eligible provider targeted by the file's e2e tests, if any.
    fn provider_affinity<'e>(
        &self,
        entries: &[&'e JobEntry],
        loads: &BTreeMap<ClusterName, ClusterLoad>,
    ) -> Option<&'e str> {
        let providers: BTreeSet<&str> = entries
            .iter()
            .copied()
            .filter_map(|entry| entry.job.e2e_cloud_provider())
            .filter(|provider| loads.values().any(|load| load.provider == *provider))
            .collect();
        match providers.len() {
            1 => providers.into_iter().next(),
            _ => None,
        }
    }

    fn add_volume(
        &self,
        loads: &mut BTreeMap<ClusterName, ClusterLoad>,
        chosen: &str,
        entry: &JobEntry,
    ) {
        let resolution = match self.config.determine_cluster_for_job(&entry.job, &entry.path) {
            Ok(Some(resolution)) => resolution,
            Ok(None) => return,
            Err(err) => {
                debug!(job = %entry.job.name, error = %err, "Job volume not accounted");
                return;
            }
        };

        let target = if resolution.cluster == chosen || resolution.may_be_relocated {
            chosen
        } else {
            resolution.cluster.as_str()
        };
        if let Some(load) = loads.get_mut(target) {
            load.volume += entry.volume;
        }
    }
}

impl RebalancePlan {
    /// Rewrite the build farm paths of `config` to route each placed file.
    ///
    /// Job lists are kept. Nothing changes when no cluster was eligible.
    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        if self.loads.is_empty() {
            return Ok(());
        }

        let mut paths: BTreeMap<&str, Vec<PathPattern>> = BTreeMap::new();
        for (file, cluster) in &self.files {
            let pattern = file_pattern(file);
            let compiled =
                PathPattern::new(pattern.as_str()).map_err(|source| ConfigError::InvalidPattern {
                    field: format!("buildFarm[{cluster}].paths"),
                    pattern,
                    source,
                })?;
            paths.entry(cluster.as_str()).or_default().push(compiled);
        }

        for clusters in config.build_farm.values_mut() {
            for (cluster, group) in clusters.iter_mut() {
                group.paths = paths.remove(cluster.as_str()).unwrap_or_default();
            }
        }
        Ok(())
    }
}
