//! The parts of a Prow job definition the dispatcher looks at.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ClusterName;

/// Label marking jobs that need the SSH bastion cluster.
pub const SSH_BASTION_LABEL: &str = "dptp.openshift.io/ssh-bastion";

/// Prefix of labels declaring a capability the job requires.
pub const CAPABILITY_LABEL_PREFIX: &str = "capability/";

/// Agent value for Kubernetes-executed jobs.
pub const KUBERNETES_AGENT: &str = "kubernetes";

/// Container variable naming the cloud provider an e2e test targets.
pub const CLUSTER_TYPE_ENV: &str = "CLUSTER_TYPE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Job metadata relevant to cluster assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBase {
    pub name: String,
    /// Execution agent; empty means Kubernetes.
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Cluster currently declared on the job, if any.
    #[serde(default)]
    pub cluster: ClusterName,
}

impl JobBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.containers.push(Container {
            image: image.into(),
            env: Vec::new(),
        });
        self
    }

    /// Set an environment variable on the last container, adding an
    /// unnamed container if the job has none.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if self.containers.is_empty() {
            self.containers.push(Container::default());
        }
        if let Some(container) = self.containers.last_mut() {
            container.env.push(EnvVar {
                name: name.into(),
                value: value.into(),
            });
        }
        self
    }

    pub fn is_kubernetes(&self) -> bool {
        self.agent.is_empty() || self.agent == KUBERNETES_AGENT
    }

    /// Image-sync jobs run a single `applyconfig` container.
    pub fn is_apply_config_job(&self) -> bool {
        matches!(self.containers.as_slice(), [only] if only.image.contains("applyconfig"))
    }

    pub fn is_ssh_bastion_job(&self) -> bool {
        self.labels.contains_key(SSH_BASTION_LABEL)
    }

    /// Capabilities requested through `capability/<name>` labels, sorted.
    pub fn required_capabilities(&self) -> Vec<String> {
        self.labels
            .keys()
            .filter_map(|key| key.strip_prefix(CAPABILITY_LABEL_PREFIX))
            .filter(|capability| !capability.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Cloud provider targeted by the job's e2e test, taken from the first
    /// non-empty `CLUSTER_TYPE` variable of its containers.
    pub fn e2e_cloud_provider(&self) -> Option<&str> {
        self.containers
            .iter()
            .flat_map(|container| container.env.iter())
            .find(|env| env.name == CLUSTER_TYPE_ENV && !env.value.is_empty())
            .map(|env| env.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent() {
        assert!(JobBase::new("a").is_kubernetes());

        let mut job = JobBase::new("a");
        job.agent = "kubernetes".to_string();
        assert!(job.is_kubernetes());

        job.agent = "jenkins".to_string();
        assert!(!job.is_kubernetes());
    }

    #[test]
    fn test_apply_config_job_needs_single_container() {
        let job = JobBase::new("a").with_image("registry.ci.openshift.org/ci/applyconfig:latest");
        assert!(job.is_apply_config_job());

        let job = job.with_image("registry.ci.openshift.org/ci/ci-operator:latest");
        assert!(!job.is_apply_config_job());

        assert!(!JobBase::new("a").is_apply_config_job());
    }

    #[test]
    fn test_ssh_bastion_label_presence() {
        let job = JobBase::new("a").with_label(SSH_BASTION_LABEL, "");
        assert!(job.is_ssh_bastion_job());

        let job = JobBase::new("a").with_label("dptp.openshift.io/non-ssh-bastion", "true");
        assert!(!job.is_ssh_bastion_job());
    }

    #[test]
    fn test_required_capabilities() {
        let job = JobBase::new("a")
            .with_label("capability/vpn", "vpn")
            .with_label("capability/arm64", "arm64")
            .with_label("ci.openshift.io/generator", "prowgen");
        assert_eq!(
            job.required_capabilities(),
            vec!["arm64".to_string(), "vpn".to_string()]
        );
    }

    #[test]
    fn test_e2e_cloud_provider() {
        assert_eq!(JobBase::new("a").e2e_cloud_provider(), None);

        let job = JobBase::new("a")
            .with_image("ci-operator:latest")
            .with_env("JOB_NAME_SAFE", "e2e")
            .with_env(CLUSTER_TYPE_ENV, "gcp");
        assert_eq!(job.e2e_cloud_provider(), Some("gcp"));

        let job = JobBase::new("a").with_env(CLUSTER_TYPE_ENV, "");
        assert_eq!(job.e2e_cloud_provider(), None);
    }
}
