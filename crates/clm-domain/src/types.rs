use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

// ── ConfigVersion ─────────────────────────────────────────────────────────────

/// An opaque, immutable configuration revision identifier (commit-hash-shaped).
///
/// Equality is by bytes. A well-formed literal version is exactly 40 lowercase
/// hex characters, but the type itself does not enforce that shape — only
/// [`ChannelVersions::version`] treats it as significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigVersion(pub String);

impl ConfigVersion {
    pub fn new(s: impl Into<String>) -> Self {
        ConfigVersion(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn literal_revision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]{40}$").expect("static regex"))
}

/// Returns true if `channel` is itself a well-formed 40-hex revision.
pub fn is_literal_revision(channel: &str) -> bool {
    literal_revision_re().is_match(channel)
}

// ── ChannelVersions ───────────────────────────────────────────────────────────

/// Immutable mapping from channel name (branch-like) to [`ConfigVersion`].
///
/// Lookup policy: a known channel resolves to its mapped revision; an
/// unrecognized channel that is itself a well-formed 40-hex literal resolves
/// to itself, so callers can pin a cluster to a revision never exposed as a
/// branch. Anything else fails with [`QueueError::UnknownChannel`].
#[derive(Debug, Clone, Default)]
pub struct ChannelVersions {
    branches: HashMap<String, ConfigVersion>,
}

impl ChannelVersions {
    pub fn new(branches: HashMap<String, ConfigVersion>) -> Self {
        ChannelVersions { branches }
    }

    pub fn version(&self, channel: &str) -> Result<ConfigVersion, QueueError> {
        if let Some(v) = self.branches.get(channel) {
            return Ok(v.clone());
        }
        if is_literal_revision(channel) {
            return Ok(ConfigVersion::new(channel));
        }
        Err(QueueError::UnknownChannel(channel.to_string()))
    }

    pub fn branches(&self) -> &HashMap<String, ConfigVersion> {
        &self.branches
    }
}

// ── Cluster ───────────────────────────────────────────────────────────────────

/// Read-only snapshot of a managed cluster, as produced by the (out-of-scope)
/// inventory endpoint. `ClusterList` never mutates a submitted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub infrastructure_account: String,
    pub lifecycle_status: String,
    pub channel: String,
    /// Symbolic environment name, may be empty.
    #[serde(default)]
    pub environment: String,
    pub status: ClusterStatus,
    #[serde(default)]
    pub config_items: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClusterStatus {
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub next_version: String,
}

/// Well-known lifecycle status strings, consumed verbatim from the inventory.
/// Unknown strings are treated as transitional (not settled, not
/// decommissioned, not decommission-requested).
pub mod lifecycle_status {
    pub const REQUESTED: &str = "requested";
    pub const READY: &str = "ready";
    pub const DECOMMISSION_REQUESTED: &str = "decommission-requested";
    pub const DECOMMISSION_PENDING: &str = "decommission-pending";
    pub const DECOMMISSIONED: &str = "decommissioned";
}

/// The `config_items` key whose presence (any value) marks a cluster as
/// update-blocked: rejected from the queue and, if in-flight, preempted.
pub const UPDATE_BLOCKED_CONFIG_ITEM: &str = "config_item/update_blocked";

impl Cluster {
    pub fn is_update_blocked(&self) -> bool {
        self.config_items.contains_key(UPDATE_BLOCKED_CONFIG_ITEM)
    }

    pub fn is_decommissioned(&self) -> bool {
        self.lifecycle_status == lifecycle_status::DECOMMISSIONED
    }

    pub fn is_decommission_requested(&self) -> bool {
        self.lifecycle_status == lifecycle_status::DECOMMISSION_REQUESTED
    }

    /// A cluster is settled when its applied version matches the target, it
    /// carries no pending next version, it isn't update-blocked, and its
    /// lifecycle isn't in a transitional state (decommission-requested counts
    /// as transitional too — only `ready` is a settled lifecycle).
    pub fn is_settled(&self, target_version: &ConfigVersion) -> bool {
        !self.status.current_version.is_empty()
            && self.status.current_version == target_version.0
            && self.status.next_version.is_empty()
            && !self.is_update_blocked()
            && self.lifecycle_status == lifecycle_status::READY
    }
}

// ── InventoryFilter ───────────────────────────────────────────────────────────

/// Include/exclude regex pair applied to cluster ids before any queue logic.
///
/// A cluster passes iff its id matches `include` AND does not match
/// `exclude`. A missing `include` matches everything; a missing `exclude`
/// matches nothing.
#[derive(Debug, Clone)]
pub struct InventoryFilter {
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
}

impl InventoryFilter {
    pub fn new(include: Option<Regex>, exclude: Option<Regex>) -> Self {
        InventoryFilter { include, exclude }
    }

    /// An `InventoryFilter` that admits every cluster id.
    pub fn match_all() -> Self {
        InventoryFilter { include: None, exclude: None }
    }

    pub fn allows(&self, cluster_id: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |re| re.is_match(cluster_id));
        let excluded = self.exclude.as_ref().map_or(false, |re| re.is_match(cluster_id));
        included && !excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_revision_is_self_resolving_regardless_of_branches() {
        let versions = ChannelVersions::new(HashMap::new());
        let h = "a".repeat(40);
        assert_eq!(versions.version(&h).unwrap().as_str(), h);
    }

    #[test]
    fn known_channel_resolves_to_mapped_revision() {
        let mut branches = HashMap::new();
        branches.insert("dev".to_string(), ConfigVersion::new("abc123"));
        let versions = ChannelVersions::new(branches);
        assert_eq!(versions.version("dev").unwrap().as_str(), "abc123");
    }

    #[test]
    fn unknown_symbolic_channel_fails() {
        let versions = ChannelVersions::new(HashMap::new());
        assert!(matches!(versions.version("staging"), Err(QueueError::UnknownChannel(_))));
    }

    #[test]
    fn non_hex_looking_40_char_string_is_not_literal() {
        // 40 chars but contains uppercase / non-hex -- must not be treated as a literal revision.
        assert!(!is_literal_revision(&"G".repeat(40)));
        assert!(!is_literal_revision(&"a".repeat(39)));
    }

    #[test]
    fn filter_include_exclude() {
        let filter = InventoryFilter::new(
            Some(Regex::new("^aws.*").unwrap()),
            Some(Regex::new("^aws:123456789222.*").unwrap()),
        );
        assert!(filter.allows("aws:123456789011:eu-central-1:ready"));
        assert!(!filter.allows("aws:123456789222:eu-central-1:excluded"));
        assert!(!filter.allows("foobar:123456789011:eu-central-1:not-included"));
    }

    #[test]
    fn missing_include_matches_all_missing_exclude_matches_none() {
        let filter = InventoryFilter::match_all();
        assert!(filter.allows("anything"));
    }

    #[test]
    fn settled_requires_ready_lifecycle_and_matching_version() {
        let target = ConfigVersion::new("def456");
        let mut cluster = Cluster {
            id: "c1".into(),
            infrastructure_account: "aws:1".into(),
            lifecycle_status: lifecycle_status::READY.into(),
            channel: "dev".into(),
            environment: "prod".into(),
            status: ClusterStatus { current_version: "def456".into(), next_version: "".into() },
            config_items: HashMap::new(),
        };
        assert!(cluster.is_settled(&target));

        cluster.status.next_version = "ghi789".into();
        assert!(!cluster.is_settled(&target));

        cluster.status.next_version = "".into();
        cluster.config_items.insert(UPDATE_BLOCKED_CONFIG_ITEM.into(), "x".into());
        assert!(!cluster.is_settled(&target));
    }
}
