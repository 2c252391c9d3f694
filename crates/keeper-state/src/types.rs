//! Persisted record types for the keeper state store.

use std::collections::BTreeMap;
use std::fmt;

use keeper_core::DesiredSpec;
use serde::{Deserialize, Serialize};

// ── Reconciler ─────────────────────────────────────────────────────

/// Reconciler state machine phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    NotStarted,
    Configuring,
    Ready,
    ReadyNonLeader,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::NotStarted => "not-started",
            Phase::Configuring => "configuring",
            Phase::Ready => "ready",
            Phase::ReadyNonLeader => "ready-non-leader",
        };
        f.write_str(s)
    }
}

/// State owned by the reconciler. Only the reconciler mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerState {
    /// The spec most recently accepted by the platform, if any.
    pub last_applied_spec: Option<DesiredSpec>,
    /// Whether the workload has been observed ready.
    pub started: bool,
    /// Phase computed by the last reconciliation.
    #[serde(default)]
    pub phase: Phase,
}

// ── Membership ─────────────────────────────────────────────────────

/// One peer unit on the cluster relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub unit: String,
    /// The peer's `ingress-address`, once it has published one.
    pub ingress_address: Option<String>,
}

/// Persisted peer set, in join order, plus the last computed replica count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub peers: Vec<PeerEntry>,
    pub replica_count: u32,
}

impl Default for ClusterRecord {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            replica_count: 1,
        }
    }
}

/// Remote units seen on each client relation, keyed by relation id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistry {
    pub relations: BTreeMap<u32, Vec<String>>,
}

// ── Relations ──────────────────────────────────────────────────────

/// Key/value data one unit owns on one relation.
pub type Databag = BTreeMap<String, String>;

/// Addresses one unit's databag on one relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    /// Relation endpoint name, e.g. `cluster` or `zookeeper`.
    pub relation: String,
    pub relation_id: u32,
    pub unit: String,
}

impl RelationKey {
    pub fn new(relation: &str, relation_id: u32, unit: &str) -> Self {
        Self {
            relation: relation.to_string(),
            relation_id,
            unit: unit.to_string(),
        }
    }

    /// Composite key: `{relation}:{relation_id}/{unit}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}/{}", self.relation, self.relation_id, self.unit)
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.table_key())
    }
}

/// A stored databag together with the key it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationData {
    pub key: RelationKey,
    pub data: Databag,
}
