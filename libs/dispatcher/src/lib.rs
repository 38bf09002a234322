//! Prow job cluster dispatch.
//!
//! Decides which build farm cluster runs each Prow job:
//!
//! - [`config`]: static assignment rules (core groups and build farm groups).
//! - [`cluster`]: the capacity model and blocked clusters.
//! - [`resolver`]: rule precedence for a single job.
//! - [`target`]: arbitration between a job's previous and resolved cluster.
//! - [`ephemeral`]: round-robin scheduling for ephemeral cluster jobs.
//! - [`rebalance`]: placement of relocatable job files by cluster load.
//! - [`records`] and [`reconcile`]: the historical assignment table and the
//!   pass that regenerates it.
//!
//! # Invariants
//!
//! - Resolution is deterministic given the same config and inputs
//! - A blocked cluster is never the final target of a job
//! - Config values are read-only once loaded

pub mod cluster;
pub mod config;
pub mod ephemeral;
pub mod error;
pub mod job;
pub mod naming;
pub mod rebalance;
pub mod reconcile;
pub mod records;
pub mod resolver;
pub mod target;

/// Name of an execution cluster, such as `build01` or `app.ci`.
pub type ClusterName = String;

/// Cloud provider tag, such as `aws` or `gcp`.
pub type CloudProvider = String;

pub use cluster::{BlockedSet, ClusterInfo, ClusterMap};
pub use config::{Config, Group, PathPattern};
pub use ephemeral::{Clock, EphemeralScheduler};
pub use error::{ConfigError, EphemeralError, ResolveError};
pub use job::JobBase;
pub use rebalance::{ClusterLoad, RebalancePlan, Rebalancer};
pub use reconcile::{JobEntry, ReconcileOutcome, Reconciler};
pub use records::{JobRecord, JobRecords, RecordMap};
pub use resolver::{AssignmentRule, Resolution};
pub use target::determine_target_cluster;
