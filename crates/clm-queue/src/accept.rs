use std::collections::HashSet;

use clm_domain::{ChannelVersions, Cluster, ConfigVersion, InventoryFilter};

/// Why an inventory snapshot for a cluster was not accepted into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    FilteredOut,
    Decommissioned,
    UpdateBlocked,
    UnknownChannel,
    /// Target version already applied and the cluster isn't mid-decommission.
    NoOpUpdate,
    /// The cluster id was present in a previous snapshot but is absent from
    /// this one.
    Absent,
}

/// Resolve a cluster's target version, or the reason it's rejected.
///
/// This governs only whether a cluster becomes (or stays) a selectable queue
/// entry. It does not affect environment gating, which reads the raw
/// inventory directly (see [`compute_suppressed`]) — a settled, rejected
/// no-op cluster still counts as "settled" for clusters gated behind it.
pub fn classify(
    cluster: &Cluster,
    versions: &ChannelVersions,
    filter: &InventoryFilter,
) -> Result<ConfigVersion, RejectReason> {
    if !filter.allows(&cluster.id) {
        return Err(RejectReason::FilteredOut);
    }
    if cluster.is_decommissioned() {
        return Err(RejectReason::Decommissioned);
    }
    if cluster.is_update_blocked() {
        return Err(RejectReason::UpdateBlocked);
    }
    let target = versions.version(&cluster.channel).map_err(|_| RejectReason::UnknownChannel)?;
    if !cluster.is_decommission_requested() && cluster.status.current_version == target.as_str() {
        return Err(RejectReason::NoOpUpdate);
    }
    Ok(target)
}

/// Environments whose clusters are suppressed from selection because an
/// earlier environment in `gated_environments` still has an unsettled
/// cluster in the current inventory. Suppression is transitive: once an
/// environment is blocked, every later environment in the list is too,
/// regardless of its own settledness.
pub fn compute_suppressed(
    gated_environments: &[String],
    clusters: &[Cluster],
    versions: &ChannelVersions,
) -> HashSet<String> {
    let mut suppressed = HashSet::new();
    let mut blocked = false;

    for env in gated_environments {
        if blocked {
            suppressed.insert(env.clone());
            continue;
        }

        let all_settled = clusters
            .iter()
            .filter(|c| &c.environment == env)
            .all(|c| match versions.version(&c.channel) {
                Ok(target) => c.is_settled(&target),
                Err(_) => false,
            });

        if !all_settled {
            blocked = true;
        }
    }

    suppressed
}
