//! Job inventory loading.
//!
//! The inventory is a YAML (or JSON) list of jobs, each carrying the
//! repository path of the file that defines it:
//!
//! ```yaml
//! - name: pull-ci-openshift-origin-master-unit
//!   cluster: build01
//!   labels:
//!     capability/arm64: arm64
//!   path: ci-operator/jobs/openshift/origin/openshift-origin-master-presubmits.yaml
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use cidispatch_dispatcher::JobEntry;
use tracing::debug;

pub fn parse_jobs(data: &str) -> Result<Vec<JobEntry>> {
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(data).context("Failed to parse job inventory")
}

pub fn load_jobs(path: &Path) -> Result<Vec<JobEntry>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job inventory: {}", path.display()))?;
    let jobs = parse_jobs(&data)
        .with_context(|| format!("Invalid job inventory: {}", path.display()))?;
    debug!(path = %path.display(), job_count = jobs.len(), "Loaded job inventory");
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_inventory() {
        let data = r#"
- name: periodic-build01-upgrade
  path: ci-operator/jobs/infra-periodics.yaml
- name: pull-ci-openshift-origin-master-unit
  agent: kubernetes
  cluster: build01
  path: ci-operator/jobs/openshift/origin/openshift-origin-master-presubmits.yaml
"#;
        let jobs = parse_jobs(data).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job.name, "periodic-build01-upgrade");
        assert!(jobs[0].job.cluster.is_empty());
        assert_eq!(jobs[1].job.cluster, "build01");
    }

    #[test]
    fn test_parse_json_inventory() {
        let data = r#"[{"name": "a", "path": "x.yaml", "containers": [{"image": "applyconfig"}]}]"#;
        let jobs = parse_jobs(data).unwrap();
        assert!(jobs[0].job.is_apply_config_job());
    }

    #[test]
    fn test_empty_inventory() {
        assert!(parse_jobs("\n").unwrap().is_empty());
    }

    #[test]
    fn test_entry_without_path_is_rejected() {
        assert!(parse_jobs("- name: a\n").is_err());
    }
}
