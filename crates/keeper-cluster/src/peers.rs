//! Join-ordered set of peer units.

use keeper_state::PeerEntry;

/// Peers known through the cluster relation, in the order they joined.
/// A unit appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
    entries: Vec<PeerEntry>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted entries, dropping duplicate units.
    pub fn from_entries(entries: Vec<PeerEntry>) -> Self {
        let mut set = Self::new();
        for entry in entries {
            set.insert(&entry.unit, entry.ingress_address);
        }
        set
    }

    /// Insert a peer, or refresh the ingress address of a known one.
    /// Returns true if the unit was not known before.
    pub fn insert(&mut self, unit: &str, ingress_address: Option<String>) -> bool {
        match self.entries.iter_mut().find(|e| e.unit == unit) {
            Some(existing) => {
                if ingress_address.is_some() {
                    existing.ingress_address = ingress_address;
                }
                false
            }
            None => {
                self.entries.push(PeerEntry {
                    unit: unit.to_string(),
                    ingress_address,
                });
                true
            }
        }
    }

    /// Remove a peer. Returns true if it was present.
    pub fn remove(&mut self, unit: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.unit != unit);
        self.entries.len() != before
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.entries.iter().any(|e| e.unit == unit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.unit.as_str())
    }

    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }
}
