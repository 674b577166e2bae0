pub mod error;
pub mod types;

pub use error::QueueError;
pub use types::{
    is_literal_revision, lifecycle_status, ChannelVersions, Cluster, ClusterStatus,
    ConfigVersion, InventoryFilter, UPDATE_BLOCKED_CONFIG_ITEM,
};
