//! Build farm capacity model.
//!
//! The cluster config file groups clusters by cloud provider:
//!
//! ```yaml
//! aws:
//!   - name: build01
//!     capacity: 80
//!     capabilities: [arm64]
//!   - name: build03
//!     blocked: true
//! gcp:
//!   - name: build02
//! ```
//!
//! A declared capacity of 0 or above 100 is normalized to 100. A negative
//! capacity blocks the cluster, same as `blocked: true`. Blocked clusters are
//! kept out of the [`ClusterMap`] and reported in the [`BlockedSet`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::{CloudProvider, ClusterName};

/// Capability tag marking clusters that take ephemeral cluster jobs.
pub const EPHEMERAL_CAPABILITY: &str = "ephemeral";

/// Capacity assumed when none (or an out of range value) is declared.
pub const FULL_CAPACITY: u32 = 100;

/// Static description of one build farm cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub provider: CloudProvider,
    /// Relative weight in (0, 100].
    pub capacity: u32,
    pub capabilities: BTreeSet<String>,
}

impl ClusterInfo {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

pub type ClusterMap = BTreeMap<ClusterName, ClusterInfo>;

pub type BlockedSet = BTreeSet<ClusterName>;

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    name: ClusterName,
    #[serde(default)]
    capacity: i64,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    blocked: bool,
}

/// Parse a cluster config document into the capacity model and blocked set.
pub fn load_cluster_config_from_str(data: &str) -> Result<(ClusterMap, BlockedSet), ConfigError> {
    let providers: BTreeMap<CloudProvider, Vec<ClusterEntry>> = serde_yaml::from_str(data)?;

    let mut clusters = ClusterMap::new();
    let mut blocked = BlockedSet::new();

    for (provider, entries) in providers {
        for entry in entries {
            let mut is_blocked = entry.blocked;
            let capacity = if entry.capacity < 0 {
                warn!(
                    cluster = %entry.name,
                    capacity = entry.capacity,
                    "Negative capacity declared, treating cluster as blocked"
                );
                is_blocked = true;
                0
            } else if entry.capacity == 0 || entry.capacity > i64::from(FULL_CAPACITY) {
                FULL_CAPACITY
            } else {
                // In (0, 100] after the branches above.
                entry.capacity as u32
            };

            if is_blocked {
                debug!(cluster = %entry.name, provider = %provider, "Cluster is blocked");
                blocked.insert(entry.name);
                continue;
            }

            clusters.insert(
                entry.name,
                ClusterInfo {
                    provider: provider.clone(),
                    capacity,
                    capabilities: entry.capabilities.into_iter().collect(),
                },
            );
        }
    }

    Ok((clusters, blocked))
}

/// Load the cluster config file at `path`.
pub fn load_cluster_config(path: impl AsRef<Path>) -> Result<(ClusterMap, BlockedSet), ConfigError> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    load_cluster_config_from_str(&data)
}

/// Whether any cluster present in both maps changed its capacity or
/// capabilities. Added and removed clusters are not considered.
pub fn has_capacity_or_capabilities_changed(prev: &ClusterMap, next: &ClusterMap) -> bool {
    prev.iter().any(|(name, before)| match next.get(name) {
        Some(after) => {
            before.capacity != after.capacity || before.capabilities != after.capabilities
        }
        None => false,
    })
}

/// Clusters eligible for ephemeral cluster jobs, sorted by name.
pub fn ephemeral_candidates(clusters: &ClusterMap) -> Vec<ClusterName> {
    clusters
        .iter()
        .filter(|(_, info)| info.has_capability(EPHEMERAL_CAPABILITY))
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTERS: &str = r#"
aws:
  - name: build01
    capacity: 0
  - name: build03
    capacity: 101
    capabilities:
      - arm64
  - name: build05
    capacity: -5
gcp:
  - name: build02
    capacity: 40
    capabilities: [ephemeral, vpn]
  - name: build04
    blocked: true
  - name: build06
    capabilities: [ephemeral]
"#;

    #[test]
    fn test_capacity_is_normalized() {
        let (clusters, _) = load_cluster_config_from_str(CLUSTERS).unwrap();
        assert_eq!(clusters["build01"].capacity, 100);
        assert_eq!(clusters["build03"].capacity, 100);
        assert_eq!(clusters["build02"].capacity, 40);
        assert_eq!(clusters["build06"].capacity, 100);
    }

    #[test]
    fn test_negative_capacity_blocks_cluster() {
        let (clusters, blocked) = load_cluster_config_from_str(CLUSTERS).unwrap();
        assert!(!clusters.contains_key("build05"));
        assert!(blocked.contains("build05"));
    }

    #[test]
    fn test_explicitly_blocked_cluster() {
        let (clusters, blocked) = load_cluster_config_from_str(CLUSTERS).unwrap();
        assert!(!clusters.contains_key("build04"));
        assert_eq!(
            blocked.into_iter().collect::<Vec<_>>(),
            vec!["build04".to_string(), "build05".to_string()]
        );
    }

    #[test]
    fn test_provider_and_capabilities() {
        let (clusters, _) = load_cluster_config_from_str(CLUSTERS).unwrap();
        let build03 = &clusters["build03"];
        assert_eq!(build03.provider, "aws");
        assert!(build03.has_capability("arm64"));
        assert_eq!(clusters["build02"].provider, "gcp");
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            load_cluster_config_from_str("aws: {name: build01"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_ephemeral_candidates_sorted() {
        let (clusters, _) = load_cluster_config_from_str(CLUSTERS).unwrap();
        assert_eq!(
            ephemeral_candidates(&clusters),
            vec!["build02".to_string(), "build06".to_string()]
        );
    }

    #[test]
    fn test_capacity_change_detection() {
        let (prev, _) = load_cluster_config_from_str(CLUSTERS).unwrap();

        let mut next = prev.clone();
        assert!(!has_capacity_or_capabilities_changed(&prev, &next));

        next.remove("build01");
        assert!(!has_capacity_or_capabilities_changed(&prev, &next));

        next.get_mut("build02").unwrap().capacity = 10;
        assert!(has_capacity_or_capabilities_changed(&prev, &next));

        let mut next = prev.clone();
        next.get_mut("build03")
            .unwrap()
            .capabilities
            .insert("vpn".to_string());
        assert!(has_capacity_or_capabilities_changed(&prev, &next));
    }
}
