use thiserror::Error;

/// Errors returned by [`crate::list::ClusterList::cluster_processed`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The token's entry no longer exists: either a previous call already
    /// completed it, or the entry was stale/cancelling and was dropped on an
    /// earlier completion. Callers should treat this as a no-op, not a bug.
    #[error("token already processed or entry no longer tracked")]
    AlreadyProcessed,
}
