//! Discovery results
//!
//! [`MappedNodes`] accumulates what one run finds; [`RelayTable`] is the
//! long-lived per-connection table those results are merged into. Both are
//! keyed by [`NodeIdentity`], so merging the same entries twice is a no-op.

use crate::identity::NodeIdentity;
use crate::types::{RelayEntry, TrackerEntry};
use dashmap::DashMap;

/// Relay and tracker entries found during one run
///
/// Append-only. The first entry recorded for an identity wins; later
/// duplicates from other branches or seeds are ignored.
#[derive(Debug, Default)]
pub struct MappedNodes {
    relays: DashMap<NodeIdentity, RelayEntry>,
    trackers: DashMap<NodeIdentity, TrackerEntry>,
}

impl MappedNodes {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a relay; returns `true` if it was new
    pub fn add_relay(&self, entry: RelayEntry) -> bool {
        let mut inserted = false;
        self.relays.entry(entry.identity.clone()).or_insert_with(|| {
            inserted = true;
            entry
        });
        inserted
    }

    /// Record a tracker; returns `true` if it was new
    pub fn add_tracker(&self, entry: TrackerEntry) -> bool {
        let mut inserted = false;
        self.trackers.entry(entry.identity.clone()).or_insert_with(|| {
            inserted = true;
            entry
        });
        inserted
    }

    /// Number of relay entries
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Number of tracker entries
    #[must_use]
    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Relay recorded for `identity`
    #[must_use]
    pub fn relay(&self, identity: &NodeIdentity) -> Option<RelayEntry> {
        self.relays.get(identity).map(|e| e.value().clone())
    }

    /// Snapshot of relay entries, sorted by identity
    #[must_use]
    pub fn relays(&self) -> Vec<RelayEntry> {
        let mut out: Vec<_> = self.relays.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    /// Snapshot of tracker entries, sorted by identity
    #[must_use]
    pub fn trackers(&self) -> Vec<TrackerEntry> {
        let mut out: Vec<_> = self.trackers.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }
}

/// Per-connection relay table fed by discovery runs
#[derive(Debug, Default)]
pub struct RelayTable {
    relays: DashMap<NodeIdentity, RelayEntry>,
    trackers: DashMap<NodeIdentity, TrackerEntry>,
}

impl RelayTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Union-merge a run's results
    ///
    /// Existing entries are replaced by the newer observation. Returns the
    /// number of identities that were not in the table before.
    pub fn merge(&self, nodes: &MappedNodes) -> usize {
        let mut added = 0;
        for entry in nodes.relays.iter() {
            if self
                .relays
                .insert(entry.key().clone(), entry.value().clone())
                .is_none()
            {
                added += 1;
            }
        }
        for entry in nodes.trackers.iter() {
            if self
                .trackers
                .insert(entry.key().clone(), entry.value().clone())
                .is_none()
            {
                added += 1;
            }
        }
        added
    }

    /// Relay for `identity`
    #[must_use]
    pub fn get(&self, identity: &NodeIdentity) -> Option<RelayEntry> {
        self.relays.get(identity).map(|e| e.value().clone())
    }

    /// Number of relays
    #[must_use]
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Number of trackers
    #[must_use]
    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Relays sorted by identity
    #[must_use]
    pub fn relays(&self) -> Vec<RelayEntry> {
        let mut out: Vec<_> = self.relays.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    /// Trackers sorted by identity
    #[must_use]
    pub fn trackers(&self) -> Vec<TrackerEntry> {
        let mut out: Vec<_> = self.trackers.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }
}
