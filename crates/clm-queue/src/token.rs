use clm_domain::{Cluster, ConfigVersion};

/// Identifies the entry (and issuance cycle) a [`ProcessingToken`] leases:
/// the slot is the entry's identity across its whole lifetime, and the
/// generation is bumped every time that entry goes Idle→InFlight. A slot is
/// reused across an entry's repeated Idle↔InFlight cycles, so the slot alone
/// can't tell a stale token from a currently-outstanding one once the same
/// entry has been selected again — the generation can.
pub type TokenId = (u64, u64);

/// A lease on exactly one cluster, issued by `SelectNext` and surrendered
/// back via `ClusterProcessed`. The `id` is an internal (slot, generation)
/// identity, not the cluster id: `ClusterProcessed` locates the entry by
/// this identity so neither a cluster that was replaced (removed and
/// re-added between selection and completion) nor a stale token from an
/// earlier issuance of the same entry can be confused with the token that
/// actually leases the entry's current in-flight cycle.
#[derive(Debug, Clone)]
pub struct ProcessingToken {
    pub(crate) id: TokenId,
    pub cluster: Cluster,
    pub target_version: ConfigVersion,
    /// The error reported on this cluster's previous completed attempt, if
    /// any. Workers may overwrite this field with the outcome of the current
    /// attempt before passing the token to `ClusterProcessed`.
    pub next_error: Option<String>,
}
