//! Dispatcher service configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

/// Files a reconciliation pass reads.
#[derive(Debug, Clone)]
pub struct Sources {
    /// Assignment rules (default, sshBastion, groups, buildFarm).
    pub config_path: PathBuf,

    /// Cluster capacity file, grouped by cloud provider.
    pub cluster_config_path: PathBuf,

    /// Job inventory: a YAML list of jobs with the path of their defining file.
    pub jobs_path: PathBuf,

    /// Where to write the config with rebalanced build farm paths, if anywhere.
    pub rebalanced_config_path: Option<PathBuf>,
}

/// Service configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub sources: Sources,
    /// Interval between full reconciliation passes.
    pub reconcile_interval: Duration,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

fn required_path(var: &str) -> Result<PathBuf> {
    std::env::var(var)
        .map(PathBuf::from)
        .with_context(|| format!("Missing {var}."))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("DISPATCHER_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("DISPATCHER_LISTEN_ADDR must be a socket address.")?;

        let sources = Sources {
            config_path: required_path("DISPATCHER_CONFIG_PATH")?,
            cluster_config_path: required_path("DISPATCHER_CLUSTER_CONFIG_PATH")?,
            jobs_path: required_path("DISPATCHER_JOBS_PATH")?,
            rebalanced_config_path: std::env::var("DISPATCHER_REBALANCED_CONFIG_PATH")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        };

        let interval_secs: u64 = std::env::var("DISPATCHER_RECONCILE_INTERVAL_SECS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("DISPATCHER_RECONCILE_INTERVAL_SECS must be an integer (seconds).")?
            .unwrap_or(600);
        let reconcile_interval = Duration::from_secs(interval_secs.max(10));

        let log_level =
            std::env::var("DISPATCHER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            sources,
            reconcile_interval,
            log_level,
        })
    }
}
