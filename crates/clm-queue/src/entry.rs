use clm_domain::{Cluster, ConfigVersion};

/// Lifecycle of a single tracked cluster. See the module-level docs on
/// [`crate::list::ClusterList`] for the full transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Eligible for selection (subject to environment gating).
    Idle,
    /// Held by an outstanding [`crate::token::ProcessingToken`].
    InFlight,
    /// Was InFlight when the inventory stopped accepting it (removed, filtered
    /// out, decommissioned, or channel no longer resolves). Retained, not
    /// selectable, until the outstanding token completes.
    InFlightStale,
    /// Was InFlight or InFlightStale when the inventory marked it
    /// update-blocked; its cancel hook has fired exactly once. Retained until
    /// the outstanding token completes, at which point the entry is dropped.
    Cancelling,
}

/// A later accepted snapshot for a cluster that is currently InFlight and
/// therefore not safe to overwrite in place. Applied when the outstanding
/// token completes.
#[derive(Debug, Clone)]
pub struct PendingRefresh {
    pub cluster: Cluster,
    pub target_version: ConfigVersion,
}

pub struct QueueEntry {
    pub cluster: Cluster,
    pub target_version: ConfigVersion,
    pub state: EntryState,
    /// Epoch at which this cluster was last completed via `ClusterProcessed`,
    /// used as the fairness tie-break in `SelectNext`. `None` sorts before
    /// any `Some`, so never-processed clusters are preferred first.
    pub last_processed_epoch: Option<u64>,
    /// The error the worker reported on the last completed attempt, carried
    /// forward into the next issued token so callers can observe it without
    /// a side channel.
    pub pending_error: Option<String>,
    pub pending_refresh: Option<PendingRefresh>,
    /// Present only while InFlight or InFlightStale; taken and invoked
    /// exactly once on the update-blocked preemption path.
    #[allow(clippy::type_complexity)]
    pub cancel_hook: Option<Box<dyn FnOnce() + Send>>,
    /// Bumped every time this entry transitions Idle→InFlight. A
    /// [`crate::token::ProcessingToken`] carries the generation it was issued
    /// under, so `ClusterProcessed` can tell a token from the current
    /// in-flight cycle apart from a stale token left over from a prior one
    /// that happens to name the same slot (the slot is reused across an
    /// entry's repeated Idle↔InFlight cycles; the generation is not).
    pub generation: u64,
}

impl QueueEntry {
    pub fn new_idle(cluster: Cluster, target_version: ConfigVersion) -> Self {
        QueueEntry {
            cluster,
            target_version,
            state: EntryState::Idle,
            last_processed_epoch: None,
            pending_error: None,
            pending_refresh: None,
            cancel_hook: None,
            generation: 0,
        }
    }

    /// Class 0 (next_version pending) outranks class 1 (decommission
    /// requested) outranks class 2 (everything else).
    pub fn priority_class(&self) -> u8 {
        if !self.cluster.status.next_version.is_empty() {
            0
        } else if self.cluster.is_decommission_requested() {
            1
        } else {
            2
        }
    }
}
