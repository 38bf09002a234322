//! Reconciliation background worker.
//!
//! Reloads the dispatcher config, the cluster capacity file and the job
//! inventory on a periodic interval, rebalances relocatable job files over
//! the build farm, regenerates the job records wholesale and starts a new
//! ephemeral scheduling epoch.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use cidispatch_dispatcher::cluster::{
    ephemeral_candidates, has_capacity_or_capabilities_changed, load_cluster_config,
};
use cidispatch_dispatcher::reconcile::ReconcileStats;
use cidispatch_dispatcher::{ClusterMap, Config, RebalancePlan, Rebalancer, Reconciler};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::config::Sources;
use crate::inventory;
use crate::state::{AppState, ReconcileReport};

/// Result of a successful pass.
#[derive(Debug)]
pub struct PassResult {
    pub stats: ReconcileStats,
    pub rebalance: RebalancePlan,
    pub clusters: ClusterMap,
}

/// Run one full reconciliation pass against `state`.
///
/// Nothing in `state` changes unless every source loads and validates.
#[instrument(skip_all)]
pub fn reconcile_once(state: &AppState, sources: &Sources) -> Result<PassResult> {
    let mut config = Config::load(&sources.config_path).with_context(|| {
        format!(
            "Failed to load dispatcher config from {}",
            sources.config_path.display()
        )
    })?;
    config.validate().context("Invalid dispatcher config")?;

    let (clusters, blocked) = load_cluster_config(&sources.cluster_config_path).with_context(|| {
        format!(
            "Failed to load cluster config from {}",
            sources.cluster_config_path.display()
        )
    })?;

    let jobs = inventory::load_jobs(&sources.jobs_path)?;

    let plan = Rebalancer::new(&config, &clusters, &blocked).rebalance(&jobs);
    plan.apply(&mut config)
        .context("Failed to apply the rebalanced build farm paths")?;
    if let Some(path) = &sources.rebalanced_config_path {
        config.save(path).with_context(|| {
            format!("Failed to save rebalanced config to {}", path.display())
        })?;
    }
    info!(
        files_placed = plan.files.len(),
        files_moved = plan.files_moved,
        "Build farm rebalanced"
    );

    let previous = state.records().get_copy();
    let outcome = Reconciler::new(&config, &clusters, &blocked).reconcile(&previous, &jobs);

    for err in &outcome.errors {
        warn!(error = %err, "Job left unassigned");
    }

    state.records().regenerate(outcome.records);
    state.ephemeral().reset(ephemeral_candidates(&clusters));
    state.set_last_reconcile(ReconcileReport {
        completed_at: Utc::now(),
        jobs_assigned: outcome.stats.jobs_assigned,
        jobs_failed: outcome.stats.jobs_failed,
    });

    for (cluster, count) in &outcome.stats.per_cluster {
        info!(cluster = %cluster, jobs = count, "Dispatched jobs on the cluster");
    }

    Ok(PassResult {
        stats: outcome.stats,
        rebalance: plan,
        clusters,
    })
}

/// Worker that periodically runs [`reconcile_once`].
pub struct ReconcileWorker {
    state: AppState,
    sources: Sources,
    interval: Duration,
    clusters: Option<ClusterMap>,
}

impl ReconcileWorker {
    /// Create a worker. `clusters` is the capacity model of the last pass,
    /// used to report capacity changes.
    pub fn new(
        state: AppState,
        sources: Sources,
        interval: Duration,
        clusters: Option<ClusterMap>,
    ) -> Self {
        Self {
            state,
            sources,
            interval,
            clusters,
        }
    }

    /// Run the worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting reconcile worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The initial pass runs before the worker starts.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&mut self) {
        let state = self.state.clone();
        let sources = self.sources.clone();
        let pass = tokio::task::spawn_blocking(move || reconcile_once(&state, &sources)).await;

        match pass {
            Ok(Ok(result)) => {
                if let Some(prev) = &self.clusters {
                    if has_capacity_or_capabilities_changed(prev, &result.clusters) {
                        info!("Cluster capacity or capabilities changed");
                    }
                }
                self.clusters = Some(result.clusters);
            }
            Ok(Err(e)) => {
                error!(error = %format!("{e:#}"), "Reconciliation failed, keeping previous assignments");
            }
            Err(e) => {
                error!(error = %e, "Reconciliation task panicked");
            }
        }
    }
}
