//! Target cluster arbitration.

use crate::cluster::BlockedSet;

/// Decide where a job runs given where it ran before and where the rules
/// would put it now.
///
/// An empty `cluster` means the job has no history and adopts
/// `determined_cluster`. Jobs stay put when their assignment is unchanged or
/// relocatable; a pinned job moves to its new cluster unless that cluster is
/// blocked. A blocked result is always replaced by `default_cluster`.
pub fn determine_target_cluster<'a>(
    cluster: &'a str,
    determined_cluster: &'a str,
    default_cluster: &'a str,
    can_be_relocated: bool,
    blocked: &BlockedSet,
) -> &'a str {
    let cluster = if cluster.is_empty() {
        determined_cluster
    } else {
        cluster
    };

    let target = if cluster == determined_cluster || can_be_relocated {
        cluster
    } else if !blocked.contains(determined_cluster) {
        determined_cluster
    } else {
        cluster
    };

    if blocked.contains(target) {
        default_cluster
    } else {
        target
    }
}
