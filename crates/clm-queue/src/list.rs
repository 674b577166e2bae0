use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use clm_domain::{ChannelVersions, Cluster, InventoryFilter};
use tracing::{debug, trace};

use crate::accept::{classify, compute_suppressed, RejectReason};
use crate::entry::{EntryState, PendingRefresh, QueueEntry};
use crate::error::TokenError;
use crate::token::ProcessingToken;

struct Inner {
    entries: HashMap<u64, QueueEntry>,
    by_id: HashMap<String, u64>,
    suppressed_environments: HashSet<String>,
    next_slot: u64,
    next_epoch: u64,
}

/// The in-memory set of clusters known to need (or be undergoing) a config
/// update, and the single source of truth for which one gets worked on next.
///
/// `UpdateAvailable` is the only write path from the inventory side;
/// `SelectNext`/`ClusterProcessed` are the only write paths from the worker
/// side. All three take the same `std::sync::Mutex`, held only for the plain
/// in-memory bookkeeping below — no I/O happens while it's held, and a
/// cluster's `cancel_hook` is always invoked after the guard is dropped, so a
/// slow or panicking hook can't block every other caller.
///
/// State machine per tracked cluster id:
///
/// ```text
/// Idle ──SelectNext──────────────► InFlight
///   ▲                                 │    │
///   └──────ClusterProcessed───────────┘    │
///                                           │ UpdateAvailable(rejects/removes)
///                                           ▼
///                                    InFlightStale ──ClusterProcessed──► removed
///                                           │
///                                           │ UpdateAvailable(update-blocked)
///                                           ▼
///                                      Cancelling ──ClusterProcessed──► removed
/// ```
///
/// An InFlight entry can also go straight to Cancelling on the same
/// UpdateAvailable call that would otherwise have staled it, if that call's
/// snapshot is specifically update-blocked.
pub struct ClusterList {
    filter: InventoryFilter,
    gated_environments: Vec<String>,
    inner: Mutex<Inner>,
}

impl ClusterList {
    pub fn new(filter: InventoryFilter, gated_environments: Vec<String>) -> Self {
        ClusterList {
            filter,
            gated_environments,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                by_id: HashMap::new(),
                suppressed_environments: HashSet::new(),
                next_slot: 0,
                next_epoch: 0,
            }),
        }
    }

    /// Number of clusters currently tracked, in any state. For metrics/tests.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconcile the queue against a fresh inventory snapshot.
    ///
    /// Accepted clusters are created (if new) or merged into their existing
    /// entry (if Idle; InFlight entries instead get a `pending_refresh`).
    /// Clusters absent from `clusters` or rejected by [`classify`] are
    /// removed if Idle, marked InFlightStale if InFlight, and have their
    /// cancel hook fired (transitioning to Cancelling) if the rejection
    /// reason is specifically `UpdateBlocked`.
    pub fn update_available(&self, versions: &ChannelVersions, clusters: &[Cluster]) {
        let mut to_fire: Vec<Box<dyn FnOnce() + Send>> = Vec::new();

        {
            let mut inner = self.inner.lock().unwrap();

            let classified: Vec<(&Cluster, Result<_, RejectReason>)> =
                clusters.iter().map(|c| (c, classify(c, versions, &self.filter))).collect();
            let by_cluster_id: HashMap<&str, &Result<_, RejectReason>> =
                classified.iter().map(|(c, r)| (c.id.as_str(), r)).collect();

            for (cluster, result) in &classified {
                if let Ok(target) = result {
                    Self::apply_accept(&mut inner, cluster, target.clone());
                }
            }

            let tracked_ids: Vec<String> = inner.by_id.keys().cloned().collect();
            for id in tracked_ids {
                let reason = match by_cluster_id.get(id.as_str()) {
                    Some(Ok(_)) => continue,
                    Some(Err(reason)) => *reason,
                    None => RejectReason::Absent,
                };
                Self::apply_reject(&mut inner, &id, reason, &mut to_fire);
            }

            inner.suppressed_environments =
                compute_suppressed(&self.gated_environments, clusters, versions);

            debug!(
                tracked = inner.entries.len(),
                suppressed_environments = inner.suppressed_environments.len(),
                "queue updated from inventory snapshot"
            );
        }

        for hook in to_fire {
            hook();
        }
    }

    fn apply_accept(inner: &mut Inner, cluster: &Cluster, target_version: clm_domain::ConfigVersion) {
        match inner.by_id.get(cluster.id.as_str()).copied() {
            Some(slot) => {
                let entry = inner.entries.get_mut(&slot).expect("by_id points at a live slot");
                match entry.state {
                    EntryState::Idle => {
                        entry.cluster = cluster.clone();
                        entry.target_version = target_version;
                    }
                    EntryState::InFlight => {
                        entry.pending_refresh =
                            Some(PendingRefresh { cluster: cluster.clone(), target_version });
                    }
                    EntryState::InFlightStale | EntryState::Cancelling => {
                        // Already on its way out; the next `ClusterProcessed`
                        // drops it. A fresh snapshot for this id will create
                        // a new entry once this one is gone.
                    }
                }
            }
            None => {
                let slot = inner.next_slot;
                inner.next_slot += 1;
                inner.entries.insert(slot, QueueEntry::new_idle(cluster.clone(), target_version));
                inner.by_id.insert(cluster.id.clone(), slot);
            }
        }
    }

    fn apply_reject(
        inner: &mut Inner,
        id: &str,
        reason: RejectReason,
        to_fire: &mut Vec<Box<dyn FnOnce() + Send>>,
    ) {
        let Some(&slot) = inner.by_id.get(id) else { return };
        let entry = inner.entries.get_mut(&slot).expect("by_id points at a live slot");

        trace!(cluster = id, ?reason, state = ?entry.state, "cluster rejected by inventory snapshot");

        match entry.state {
            EntryState::Idle => {
                inner.entries.remove(&slot);
                inner.by_id.remove(id);
            }
            EntryState::InFlight => {
                if reason == RejectReason::UpdateBlocked {
                    if let Some(hook) = entry.cancel_hook.take() {
                        to_fire.push(hook);
                    }
                    entry.state = EntryState::Cancelling;
                } else {
                    entry.state = EntryState::InFlightStale;
                }
            }
            EntryState::InFlightStale => {
                if reason == RejectReason::UpdateBlocked {
                    if let Some(hook) = entry.cancel_hook.take() {
                        to_fire.push(hook);
                    }
                    entry.state = EntryState::Cancelling;
                }
            }
            EntryState::Cancelling => {
                // Hook already fired; nothing left to do before completion.
            }
        }
    }

    /// Choose the next Idle, non-suppressed entry, ordered by priority class
    /// and then by least-recently-processed (never-processed first), with
    /// cluster id as the final tie-break for determinism.
    ///
    /// `cancel_hook` is stashed on the chosen entry and invoked at most once,
    /// if and when that cluster is later preempted by an update-blocked
    /// snapshot.
    pub fn select_next(&self, cancel_hook: Box<dyn FnOnce() + Send>) -> Option<ProcessingToken> {
        let mut inner = self.inner.lock().unwrap();
        let suppressed = inner.suppressed_environments.clone();

        let mut best: Option<(u64, (u8, Option<u64>, String))> = None;
        for (&slot, entry) in inner.entries.iter() {
            if entry.state != EntryState::Idle {
                continue;
            }
            if suppressed.contains(&entry.cluster.environment) {
                continue;
            }
            let key = (entry.priority_class(), entry.last_processed_epoch, entry.cluster.id.clone());
            if best.as_ref().map_or(true, |(_, best_key)| key < *best_key) {
                best = Some((slot, key));
            }
        }

        let (slot, _) = best?;
        let entry = inner.entries.get_mut(&slot).expect("slot came from entries iteration");
        entry.state = EntryState::InFlight;
        entry.cancel_hook = Some(cancel_hook);
        entry.generation += 1;
        let generation = entry.generation;

        Some(ProcessingToken {
            id: (slot, generation),
            cluster: entry.cluster.clone(),
            target_version: entry.target_version.clone(),
            next_error: entry.pending_error.clone(),
        })
    }

    /// Surrender a token issued by `select_next`. Records the worker's
    /// reported error, advances the fairness epoch, and either returns the
    /// entry to Idle (applying any pending refresh) or drops it entirely if
    /// it was InFlightStale/Cancelling.
    pub fn cluster_processed(&self, token: ProcessingToken) -> Result<(), TokenError> {
        let mut inner = self.inner.lock().unwrap();

        let (slot, generation) = token.id;
        match inner.entries.get(&slot) {
            Some(e) if e.state != EntryState::Idle && e.generation == generation => {}
            _ => return Err(TokenError::AlreadyProcessed),
        }

        let epoch = inner.next_epoch;
        inner.next_epoch += 1;

        let cluster_id;
        let should_remove;
        {
            let entry = inner.entries.get_mut(&slot).expect("checked above");
            entry.pending_error = token.next_error;
            entry.last_processed_epoch = Some(epoch);
            cluster_id = entry.cluster.id.clone();
            should_remove = matches!(entry.state, EntryState::InFlightStale | EntryState::Cancelling);

            if !should_remove {
                if let Some(refresh) = entry.pending_refresh.take() {
                    entry.cluster = refresh.cluster;
                    entry.target_version = refresh.target_version;
                }
                entry.state = EntryState::Idle;
                entry.cancel_hook = None;
            }
        }

        if should_remove {
            inner.entries.remove(&slot);
            inner.by_id.remove(&cluster_id);
        }

        Ok(())
    }
}
