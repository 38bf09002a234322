//! Cluster resolution for a single job.
//!
//! Rules are evaluated in order and the first one that applies wins:
//!
//! 1. Jobs for a non-Kubernetes agent are out of scope.
//! 2. `vsphere` jobs (other than image-sync jobs) go to the vsphere cluster.
//! 3. SSH bastion jobs go to the configured bastion cluster.
//! 4. Exact job name in a core group.
//! 5. Path regex of a core group.
//! 6. Exact job name in a build farm group.
//! 7. Path regex of a build farm group.
//! 8. The default cluster.
//!
//! Path regexes of the core and build farm tables are pooled: a path matching
//! more than one of them is an error, whichever tables they come from and
//! even when they belong to the same group.

use tracing::debug;

use crate::config::Config;
use crate::error::ResolveError;
use crate::job::JobBase;
use crate::ClusterName;

/// Cluster that runs every vsphere job.
pub const VSPHERE_CLUSTER: &str = "vsphere";

/// The rule that produced a [`Resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentRule {
    VSphere,
    SshBastion,
    CoreJob,
    CorePath,
    BuildFarmJob,
    BuildFarmPath,
    Default,
}

impl AssignmentRule {
    /// Whether assignments made by this rule may be moved for load balancing.
    pub fn is_relocatable(self) -> bool {
        matches!(self, Self::BuildFarmJob | Self::BuildFarmPath | Self::Default)
    }
}

/// Outcome of resolving a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub cluster: ClusterName,
    pub may_be_relocated: bool,
    pub rule: AssignmentRule,
}

impl Resolution {
    fn new(cluster: impl Into<ClusterName>, rule: AssignmentRule) -> Self {
        Self {
            cluster: cluster.into(),
            may_be_relocated: rule.is_relocatable(),
            rule,
        }
    }
}

struct PathMatch<'a> {
    pattern: &'a str,
    cluster: &'a str,
    build_farm: bool,
}

impl Config {
    /// Resolve the cluster for `job`, defined in the file at `path`.
    ///
    /// Returns `Ok(None)` for jobs this dispatcher does not handle.
    pub fn determine_cluster_for_job(
        &self,
        job: &JobBase,
        path: &str,
    ) -> Result<Option<Resolution>, ResolveError> {
        if !job.is_kubernetes() {
            return Ok(None);
        }

        let resolution = self.resolve(job, path)?;
        debug!(
            job = %job.name,
            path = %path,
            cluster = %resolution.cluster,
            rule = ?resolution.rule,
            may_be_relocated = resolution.may_be_relocated,
            "Resolved cluster for job"
        );
        Ok(Some(resolution))
    }

    fn resolve(&self, job: &JobBase, path: &str) -> Result<Resolution, ResolveError> {
        if job.name.contains(VSPHERE_CLUSTER) && !job.is_apply_config_job() {
            return Ok(Resolution::new(VSPHERE_CLUSTER, AssignmentRule::VSphere));
        }

        if job.is_ssh_bastion_job() && !self.ssh_bastion.is_empty() {
            return Ok(Resolution::new(
                self.ssh_bastion.as_str(),
                AssignmentRule::SshBastion,
            ));
        }

        if let Some(cluster) = self
            .groups
            .iter()
            .find(|(_, group)| group.has_job(&job.name))
            .map(|(cluster, _)| cluster)
        {
            return Ok(Resolution::new(cluster.as_str(), AssignmentRule::CoreJob));
        }

        let matches: Vec<PathMatch<'_>> = self
            .all_groups()
            .flat_map(|(provider, cluster, group)| {
                group.matching_paths(path).map(move |pattern| PathMatch {
                    pattern: pattern.as_str(),
                    cluster,
                    build_farm: provider.is_some(),
                })
            })
            .collect();

        if matches.len() > 1 {
            let mut patterns: Vec<String> =
                matches.iter().map(|m| m.pattern.to_string()).collect();
            patterns.sort();
            return Err(ResolveError::AmbiguousPath {
                path: path.to_string(),
                matches: patterns,
            });
        }
        let path_match = matches.first();

        if let Some(m) = path_match.filter(|m| !m.build_farm) {
            return Ok(Resolution::new(m.cluster, AssignmentRule::CorePath));
        }

        if let Some(cluster) = self
            .build_farm
            .values()
            .flat_map(|clusters| clusters.iter())
            .find(|(_, group)| group.has_job(&job.name))
            .map(|(cluster, _)| cluster)
        {
            return Ok(Resolution::new(cluster.as_str(), AssignmentRule::BuildFarmJob));
        }

        if let Some(m) = path_match {
            return Ok(Resolution::new(m.cluster, AssignmentRule::BuildFarmPath));
        }

        Ok(Resolution::new(self.default.as_str(), AssignmentRule::Default))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::job::SSH_BASTION_LABEL;

    const CONFIG: &str = r#"
default: app.ci
sshBastion: build02
groups:
  app.ci:
    jobs:
      - periodic-acme-cert-issuer-for-build01
      - periodic-vsphere-cleanup
    paths:
      - ".*-postsubmits.yaml$"
  build01:
    jobs:
      - periodic-build01-upgrade
    paths:
      - ".*openshift-priv/.*-presubmits.yaml$"
buildFarm:
  aws:
    build03:
      jobs:
        - pull-ci-openshift-installer-master-e2e
      paths:
        - ".*openshift/installer/.*-presubmits.yaml$"
  gcp:
    build04:
      paths:
        - ".*openshift/origin/.*-presubmits.yaml$"
"#;

    fn config() -> Config {
        Config::from_yaml(CONFIG).unwrap()
    }

    fn resolve(job: &JobBase, path: &str) -> Resolution {
        config()
            .determine_cluster_for_job(job, path)
            .unwrap()
            .expect("job should be in scope")
    }

    #[rstest]
    #[case::jenkins("jenkins")]
    #[case::tekton("tekton-pipeline")]
    fn test_non_kubernetes_agent_is_out_of_scope(#[case] agent: &str) {
        let mut job = JobBase::new("periodic-build01-upgrade");
        job.agent = agent.to_string();
        assert_eq!(
            config()
                .determine_cluster_for_job(&job, "org/repo/repo-master-postsubmits.yaml")
                .unwrap(),
            None
        );
    }

    #[rstest]
    #[case::core_job(
        "periodic-build01-upgrade",
        "org/repo/repo-master-presubmits.yaml",
        "build01",
        AssignmentRule::CoreJob
    )]
    #[case::core_path(
        "pull-ci-org-repo-master-unit",
        "ci-operator/jobs/openshift-priv/repo/repo-master-presubmits.yaml",
        "build01",
        AssignmentRule::CorePath
    )]
    #[case::build_farm_job(
        "pull-ci-openshift-installer-master-e2e",
        "org/repo/repo-master-presubmits.yaml",
        "build03",
        AssignmentRule::BuildFarmJob
    )]
    #[case::build_farm_path(
        "pull-ci-openshift-origin-master-unit",
        "ci-operator/jobs/openshift/origin/origin-master-presubmits.yaml",
        "build04",
        AssignmentRule::BuildFarmPath
    )]
    #[case::default(
        "pull-ci-org-repo-master-unit",
        "ci-operator/jobs/org/repo/repo-master-presubmits.yaml",
        "app.ci",
        AssignmentRule::Default
    )]
    fn test_rules(
        #[case] name: &str,
        #[case] path: &str,
        #[case] cluster: &str,
        #[case] rule: AssignmentRule,
    ) {
        let resolution = resolve(&JobBase::new(name), path);
        assert_eq!(resolution.cluster, cluster);
        assert_eq!(resolution.rule, rule);
        assert_eq!(resolution.may_be_relocated, rule.is_relocatable());
    }

    #[test]
    fn test_vsphere_precedes_exact_job_name() {
        let mut job = JobBase::new("periodic-vsphere-cleanup");
        job.agent = "kubernetes".to_string();
        let resolution = resolve(&job, "org/repo/repo-master-postsubmits.yaml");
        assert_eq!(resolution.cluster, VSPHERE_CLUSTER);
        assert!(!resolution.may_be_relocated);
    }

    #[test]
    fn test_vsphere_apply_config_job_falls_through() {
        let job = JobBase::new("periodic-vsphere-cleanup")
            .with_image("registry.ci.openshift.org/ci/applyconfig:latest");
        let resolution = resolve(&job, "org/repo/repo-master-postsubmits.yaml");
        assert_eq!(resolution.cluster, "app.ci");
        assert_eq!(resolution.rule, AssignmentRule::CoreJob);
    }

    #[test]
    fn test_ssh_bastion_precedes_groups() {
        let job =
            JobBase::new("periodic-build01-upgrade").with_label(SSH_BASTION_LABEL, "true");
        let resolution = resolve(&job, "org/repo/repo-master-presubmits.yaml");
        assert_eq!(resolution.cluster, "build02");
        assert_eq!(resolution.rule, AssignmentRule::SshBastion);
        assert!(!resolution.may_be_relocated);
    }

    #[test]
    fn test_ssh_bastion_without_configured_cluster() {
        let mut config = config();
        config.ssh_bastion.clear();
        let job =
            JobBase::new("periodic-build01-upgrade").with_label(SSH_BASTION_LABEL, "true");
        let resolution = config
            .determine_cluster_for_job(&job, "org/repo/repo-master-presubmits.yaml")
            .unwrap()
            .unwrap();
        assert_eq!(resolution.cluster, "build01");
    }

    #[test]
    fn test_core_path_precedes_build_farm_job_name() {
        let job = JobBase::new("pull-ci-openshift-installer-master-e2e");
        let resolution = resolve(&job, "openshift-priv/installer/installer-master-presubmits.yaml");
        assert_eq!(resolution.cluster, "build01");
        assert!(!resolution.may_be_relocated);
    }

    #[test]
    fn test_ambiguous_core_paths() {
        let data = r#"
default: app.ci
groups:
  app.ci:
    paths: [".*-presubmits.yaml$"]
  build01:
    paths: [".*openshift-priv/.*"]
"#;
        let config = Config::from_yaml(data).unwrap();
        let err = config
            .determine_cluster_for_job(
                &JobBase::new("pull-ci-x"),
                "openshift-priv/repo/repo-master-presubmits.yaml",
            )
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::AmbiguousPath {
                path: "openshift-priv/repo/repo-master-presubmits.yaml".to_string(),
                matches: vec![
                    ".*-presubmits.yaml$".to_string(),
                    ".*openshift-priv/.*".to_string()
                ],
            }
        );
    }

    #[test]
    fn test_ambiguous_across_core_and_build_farm() {
        let path = "ci-operator/jobs/openshift/installer/installer-master-presubmits.yaml";
        let mut config = config();
        config.groups.get_mut("app.ci").unwrap().paths =
            vec![crate::config::PathPattern::new(".*installer.*").unwrap()];

        let err = config
            .determine_cluster_for_job(&JobBase::new("pull-ci-openshift-installer-master-e2e"), path)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "path {path} matches more than 1 regex: [.*installer.* .*openshift/installer/.*-presubmits.yaml$]"
            )
        );
    }

    #[test]
    fn test_ambiguous_across_build_farm_providers() {
        let data = r#"
default: app.ci
buildFarm:
  aws:
    build03:
      paths: ["b.*"]
  gcp:
    build04:
      paths: ["a.*"]
"#;
        let config = Config::from_yaml(data).unwrap();
        match config.determine_cluster_for_job(&JobBase::new("j"), "ab") {
            Err(ResolveError::AmbiguousPath { matches, .. }) => {
                assert_eq!(matches, vec!["a.*".to_string(), "b.*".to_string()]);
            }
            other => panic!("Expected AmbiguousPath, got {:?}", other),
        }
    }

    #[test]
    fn test_two_regexes_of_one_group_are_ambiguous() {
        let data = r#"
default: app.ci
groups:
  build01:
    paths: [".*yaml$", ".*priv.*"]
"#;
        let config = Config::from_yaml(data).unwrap();
        let err = config
            .determine_cluster_for_job(&JobBase::new("j"), "openshift-priv/repo/x.yaml")
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::AmbiguousPath {
                path: "openshift-priv/repo/x.yaml".to_string(),
                matches: vec![".*priv.*".to_string(), ".*yaml$".to_string()],
            }
        );

        let single = config
            .determine_cluster_for_job(&JobBase::new("j"), "org/repo/x.yaml")
            .unwrap()
            .unwrap();
        assert_eq!(single.cluster, "build01");
    }

    #[test]
    fn test_exact_name_short_circuits_path_ambiguity() {
        let data = r#"
default: app.ci
groups:
  app.ci:
    jobs: [pinned]
    paths: [".*"]
  build01:
    paths: [".*yaml$"]
"#;
        let config = Config::from_yaml(data).unwrap();
        let resolution = config
            .determine_cluster_for_job(&JobBase::new("pinned"), "x.yaml")
            .unwrap()
            .unwrap();
        assert_eq!(resolution.cluster, "app.ci");
    }
}
