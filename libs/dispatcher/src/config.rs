//! Static job-to-cluster assignment rules.
//!
//! ```yaml
//! default: build01
//! sshBastion: build02
//! groups:
//!   app.ci:
//!     jobs: [periodic-acme-cert-issuer]
//!     paths: [".*-periodics.yaml$"]
//! buildFarm:
//!   aws:
//!     build03:
//!       paths: [".*openshift/installer/.*"]
//! ```
//!
//! `groups` is the core table: its matches are pinned. `buildFarm` nests
//! groups under a cloud provider and its matches may be relocated.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::ConfigError;
use crate::{CloudProvider, ClusterName};

/// A path regex kept together with the source it was compiled from.
///
/// Only the source is persisted.
#[derive(Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        let source = source.into();
        let regex = Regex::new(&source)?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.source).finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathPattern {}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// A set of jobs assigned to one cluster, by exact name or by the path of
/// the file defining them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Group {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathPattern>,
}

impl Group {
    pub fn has_job(&self, name: &str) -> bool {
        self.jobs.iter().any(|job| job == name)
    }

    /// Patterns matching `path`.
    pub fn matching_paths<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a PathPattern> {
        self.paths.iter().filter(move |pattern| pattern.is_match(path))
    }
}

/// Dispatcher assignment configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Cluster used when no rule matches.
    pub default: ClusterName,
    /// Cluster for jobs carrying the SSH bastion label.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssh_bastion: ClusterName,
    /// Core table: pinned assignments.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<ClusterName, Group>,
    /// Relocatable assignments, keyed by cloud provider.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub build_farm: BTreeMap<CloudProvider, BTreeMap<ClusterName, Group>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGroup {
    #[serde(default)]
    jobs: Vec<String>,
    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    default: ClusterName,
    #[serde(default)]
    ssh_bastion: ClusterName,
    #[serde(default)]
    groups: BTreeMap<ClusterName, RawGroup>,
    #[serde(default)]
    build_farm: BTreeMap<CloudProvider, BTreeMap<ClusterName, RawGroup>>,
}

fn compile_group(field: &str, raw: RawGroup, errors: &mut Vec<ConfigError>) -> Group {
    let mut paths = Vec::with_capacity(raw.paths.len());
    for (i, source) in raw.paths.into_iter().enumerate() {
        match PathPattern::new(source.as_str()) {
            Ok(pattern) => paths.push(pattern),
            Err(err) => errors.push(ConfigError::InvalidPattern {
                field: format!("{field}.paths[{i}]"),
                pattern: source,
                source: err,
            }),
        }
    }
    Group {
        jobs: raw.jobs,
        paths,
    }
}

impl Config {
    /// Parse a config document and compile every path regex.
    ///
    /// Regex failures are collected and returned together.
    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(data)?;
        let mut errors = Vec::new();

        let groups = raw
            .groups
            .into_iter()
            .map(|(cluster, group)| {
                let group = compile_group(&format!("groups[{cluster}]"), group, &mut errors);
                (cluster, group)
            })
            .collect();

        let build_farm = raw
            .build_farm
            .into_iter()
            .map(|(provider, clusters)| {
                let clusters = clusters
                    .into_iter()
                    .map(|(cluster, group)| {
                        let field = format!("buildFarm[{provider}][{cluster}]");
                        let group = compile_group(&field, group, &mut errors);
                        (cluster, group)
                    })
                    .collect();
                (provider, clusters)
            })
            .collect();

        if let Some(err) = ConfigError::aggregate(errors) {
            return Err(err);
        }

        Ok(Self {
            default: raw.default,
            ssh_bastion: raw.ssh_bastion,
            groups,
            build_farm,
        })
    }

    /// Load the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&data)?;
        debug!(
            path = %path.display(),
            groups = config.groups.len(),
            build_farm_providers = config.build_farm.len(),
            "Loaded dispatcher config"
        );
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let data = self.to_yaml()?;
        std::fs::write(path, data).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check that a default is set and that no job name is assigned twice
    /// across the core and build farm tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.default.is_empty() {
            errors.push(ConfigError::MissingDefault);
        }

        let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
        for group in self.all_groups().map(|(_, _, group)| group) {
            for job in &group.jobs {
                *occurrences.entry(job.as_str()).or_default() += 1;
            }
        }
        let duplicates: Vec<String> = occurrences
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(job, _)| job.to_string())
            .collect();
        if !duplicates.is_empty() {
            errors.push(ConfigError::DuplicateJobs(duplicates));
        }

        match ConfigError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Every group as `(provider, cluster, group)`; the provider is `None`
    /// for the core table. Core groups come first.
    pub fn all_groups(&self) -> impl Iterator<Item = (Option<&str>, &str, &Group)> {
        let core = self
            .groups
            .iter()
            .map(|(cluster, group)| (None::<&str>, cluster.as_str(), group));
        let farm = self.build_farm.iter().flat_map(|(provider, clusters)| {
            clusters
                .iter()
                .map(move |(cluster, group)| (Some(provider.as_str()), cluster.as_str(), group))
        });
        core.chain(farm)
    }

    /// The cloud provider owning `cluster` in the build farm table.
    pub fn is_in_build_farm(&self, cluster: &str) -> Option<&CloudProvider> {
        self.build_farm
            .iter()
            .find(|(_, clusters)| clusters.contains_key(cluster))
            .map(|(provider, _)| provider)
    }

    /// Whether `path` matches any path regex of the core table.
    pub fn matching_path_regex(&self, path: &str) -> bool {
        self.groups
            .values()
            .any(|group| group.matching_paths(path).next().is_some())
    }
}
