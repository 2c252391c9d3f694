//! Membership tracker — derives the replica count from the peer set.
//!
//! With `ha-mode` off the count is pinned to 1. With it on, the count is
//! the number of known peers plus this unit. Every join, departure or
//! mode change recomputes the count and reports whether it moved.

use tracing::{debug, info};

use keeper_state::{ClusterRecord, PeerEntry, StateResult, StateStore};

use crate::peers::PeerSet;

/// Result of a membership recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    Unchanged,
    /// The replica count moved; the owner should trigger a reconcile.
    Resized { from: u32, to: u32 },
}

impl MembershipChange {
    pub fn is_resized(&self) -> bool {
        matches!(self, MembershipChange::Resized { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MembershipTracker {
    ha_mode: bool,
    peers: PeerSet,
    /// Last computed replica count.
    replica_count: u32,
}

impl MembershipTracker {
    /// A tracker with no peer relation yet.
    pub fn new(ha_mode: bool) -> Self {
        Self::restore(ha_mode, ClusterRecord::default())
    }

    /// Rebuild from a persisted record. The cached count is taken as-is so
    /// a change of `ha_mode` since the record was written still shows up
    /// as a resize on the next recompute.
    pub fn restore(ha_mode: bool, record: ClusterRecord) -> Self {
        Self {
            ha_mode,
            peers: PeerSet::from_entries(record.peers),
            replica_count: record.replica_count.max(1),
        }
    }

    pub fn load(store: &StateStore, ha_mode: bool) -> StateResult<Self> {
        Ok(Self::restore(ha_mode, store.get_cluster()?))
    }

    pub fn save(&self, store: &StateStore) -> StateResult<()> {
        store.put_cluster(&self.record())
    }

    /// Snapshot for persistence.
    pub fn record(&self) -> ClusterRecord {
        ClusterRecord {
            peers: self.peers.entries().to_vec(),
            replica_count: self.replica_count,
        }
    }

    pub fn ha_mode(&self) -> bool {
        self.ha_mode
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Replica count derived from the current peer set and mode.
    pub fn current_replica_count(&self) -> u32 {
        if !self.ha_mode {
            return 1;
        }
        u32::try_from(self.peers.len())
            .unwrap_or(u32::MAX - 1)
            .saturating_add(1)
    }

    /// The count as of the last recompute.
    pub fn cached_replica_count(&self) -> u32 {
        self.replica_count
    }

    pub fn on_peer_joined(&mut self, unit: &str, ingress_address: Option<String>) -> MembershipChange {
        if self.peers.insert(unit, ingress_address) {
            info!(%unit, peers = self.peers.len(), "peer joined");
        } else {
            debug!(%unit, "known peer rejoined");
        }
        self.recompute()
    }

    pub fn on_peer_departed(&mut self, unit: &str) -> MembershipChange {
        if self.peers.remove(unit) {
            info!(%unit, peers = self.peers.len(), "peer departed");
        } else {
            debug!(%unit, "departure of unknown peer ignored");
        }
        self.recompute()
    }

    /// Replace the peer set with the runtime's full listing of the
    /// relation. Known units keep their join position; new ones are
    /// appended in listing order. The count is recomputed once, however
    /// many units the listing adds or drops.
    pub fn sync_peers(&mut self, listing: &[PeerEntry]) -> MembershipChange {
        let gone: Vec<String> = self
            .peers
            .units()
            .filter(|unit| !listing.iter().any(|e| e.unit == *unit))
            .map(str::to_string)
            .collect();
        for unit in &gone {
            self.peers.remove(unit);
        }
        let mut added = 0;
        for entry in listing {
            if self.peers.insert(&entry.unit, entry.ingress_address.clone()) {
                added += 1;
            }
        }
        if added > 0 || !gone.is_empty() {
            info!(added, departed = gone.len(), peers = self.peers.len(), "peer listing synced");
        }
        self.recompute()
    }

    pub fn set_ha_mode(&mut self, ha_mode: bool) -> MembershipChange {
        if self.ha_mode != ha_mode {
            info!(ha_mode, "ha-mode changed");
        }
        self.ha_mode = ha_mode;
        self.recompute()
    }

    /// Recompute the replica count and compare it with the cached one.
    pub fn recompute(&mut self) -> MembershipChange {
        let from = self.replica_count;
        let to = self.current_replica_count();
        self.replica_count = to;
        if from == to {
            MembershipChange::Unchanged
        } else {
            info!(from, to, "replica count changed");
            MembershipChange::Resized { from, to }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_peer_relation_counts_one() {
        let tracker = MembershipTracker::new(true);
        assert_eq!(tracker.current_replica_count(), 1);
        assert_eq!(tracker.cached_replica_count(), 1);
    }

    #[test]
    fn ha_off_pins_count_to_one() {
        let mut tracker = MembershipTracker::new(false);
        for i in 1..=5 {
            let change = tracker.on_peer_joined(&format!("zookeeper/{i}"), None);
            assert_eq!(change, MembershipChange::Unchanged);
        }
        assert_eq!(tracker.peers().len(), 5);
        assert_eq!(tracker.current_replica_count(), 1);
    }

    #[test]
    fn ha_on_counts_peers_plus_self() {
        let mut tracker = MembershipTracker::new(true);
        for i in 1..=3 {
            tracker.on_peer_joined(&format!("zookeeper/{i}"), None);
        }
        assert_eq!(tracker.current_replica_count(), 4);
    }

    #[test]
    fn join_and_depart_report_resizes() {
        let mut tracker = MembershipTracker::new(true);
        assert_eq!(
            tracker.on_peer_joined("zookeeper/1", Some("10.0.0.1".into())),
            MembershipChange::Resized { from: 1, to: 2 }
        );
        // Re-join of a known peer does not change the count.
        assert_eq!(
            tracker.on_peer_joined("zookeeper/1", Some("10.0.0.1".into())),
            MembershipChange::Unchanged
        );
        assert_eq!(
            tracker.on_peer_departed("zookeeper/1"),
            MembershipChange::Resized { from: 2, to: 1 }
        );
        assert_eq!(
            tracker.on_peer_departed("zookeeper/1"),
            MembershipChange::Unchanged
        );
    }

    #[test]
    fn toggling_ha_mode_resizes() {
        let mut tracker = MembershipTracker::new(false);
        tracker.on_peer_joined("zookeeper/1", None);
        tracker.on_peer_joined("zookeeper/2", None);
        assert_eq!(
            tracker.set_ha_mode(true),
            MembershipChange::Resized { from: 1, to: 3 }
        );
        assert!(tracker.set_ha_mode(false).is_resized());
        assert_eq!(tracker.set_ha_mode(false), MembershipChange::Unchanged);
    }

    #[test]
    fn listing_resizes_once() {
        let entry = |unit: &str, address: Option<&str>| PeerEntry {
            unit: unit.to_string(),
            ingress_address: address.map(str::to_string),
        };
        let mut tracker = MembershipTracker::new(true);
        tracker.on_peer_joined("zookeeper/3", Some("10.0.0.3".into()));

        let change = tracker.sync_peers(&[
            entry("zookeeper/1", None),
            entry("zookeeper/3", None),
            entry("zookeeper/2", Some("10.0.0.2")),
        ]);
        assert_eq!(change, MembershipChange::Resized { from: 2, to: 4 });
        let units: Vec<&str> = tracker.peers().units().collect();
        assert_eq!(units, vec!["zookeeper/3", "zookeeper/1", "zookeeper/2"]);
        // Listed without an address: the known one stays.
        assert_eq!(
            tracker.peers().entries()[0].ingress_address.as_deref(),
            Some("10.0.0.3")
        );

        assert_eq!(
            tracker.sync_peers(&[entry("zookeeper/2", None), entry("zookeeper/3", None), entry("zookeeper/1", None)]),
            MembershipChange::Unchanged
        );
        assert_eq!(
            tracker.sync_peers(&[entry("zookeeper/2", None)]),
            MembershipChange::Resized { from: 4, to: 2 }
        );
        assert!(!tracker.peers().contains("zookeeper/3"));
    }

    #[test]
    fn survives_store_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let mut tracker = MembershipTracker::load(&store, true).unwrap();
        tracker.on_peer_joined("zookeeper/1", None);
        tracker.on_peer_joined("zookeeper/2", None);
        tracker.save(&store).unwrap();

        let mut restored = MembershipTracker::load(&store, true).unwrap();
        assert_eq!(restored.cached_replica_count(), 3);
        assert_eq!(restored.recompute(), MembershipChange::Unchanged);

        // Mode flipped while the process was down.
        let mut flipped = MembershipTracker::load(&store, false).unwrap();
        assert_eq!(
            flipped.recompute(),
            MembershipChange::Resized { from: 3, to: 1 }
        );
    }
}
