//! Facade crate re-exporting the pieces a caller wires together to run a
//! config rollout loop: a [`clm_channel::ChannelSource`] resolving channels
//! to revisions, and a [`clm_queue::ClusterList`] deciding which cluster to
//! hand a worker next. See `demos/poll_loop.rs` for a minimal end-to-end
//! wiring of the two.

pub use clm_channel::{ChannelError, ChannelSource, Config, GitChannelConfig, GitChannelSource, SystemGit, VcsRunner};
pub use clm_domain::{
    is_literal_revision, lifecycle_status, ChannelVersions, Cluster, ClusterStatus, ConfigVersion,
    InventoryFilter, QueueError, UPDATE_BLOCKED_CONFIG_ITEM,
};
pub use clm_queue::{ClusterList, EntryState, ProcessingToken, QueueEntry, RejectReason, TokenError};
