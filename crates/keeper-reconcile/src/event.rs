//! Events delivered by the hosting runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

use keeper_relation::ClientRequest;
use keeper_state::PeerEntry;

use crate::reconciler::Trigger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    Start,
    Stop,
    ConfigChanged,
    Upgrade,
    LeaderElected,
    UpdateStatus,
    ClusterRelationJoined {
        unit: String,
        #[serde(default)]
        ingress_address: Option<String>,
    },
    ClusterRelationDeparted {
        unit: String,
    },
    /// The runtime's full listing of the cluster relation's remote units.
    ClusterRelationChanged {
        peers: Vec<PeerEntry>,
    },
    ClientRelationJoined(ClientRequest),
    ClientRelationChanged(ClientRequest),
    ClientRelationDeparted {
        relation_id: u32,
        unit: String,
    },
}

impl Event {
    /// Hook-style name, e.g. `config-changed`.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::Stop => "stop",
            Event::ConfigChanged => "config-changed",
            Event::Upgrade => "upgrade",
            Event::LeaderElected => "leader-elected",
            Event::UpdateStatus => "update-status",
            Event::ClusterRelationJoined { .. } => "cluster-relation-joined",
            Event::ClusterRelationDeparted { .. } => "cluster-relation-departed",
            Event::ClusterRelationChanged { .. } => "cluster-relation-changed",
            Event::ClientRelationJoined(_) => "client-relation-joined",
            Event::ClientRelationChanged(_) => "client-relation-changed",
            Event::ClientRelationDeparted { .. } => "client-relation-departed",
        }
    }

    /// The reconciliation trigger this event maps to, if it reconciles.
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Event::Start => Some(Trigger::Start),
            Event::ConfigChanged => Some(Trigger::ConfigChanged),
            Event::LeaderElected => Some(Trigger::LeaderElected),
            Event::UpdateStatus => Some(Trigger::UpdateStatus),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ClusterRelationJoined { unit, .. } | Event::ClusterRelationDeparted { unit } => {
                write!(f, "{} ({unit})", self.name())
            }
            Event::ClusterRelationChanged { peers } => {
                write!(f, "{} ({} peers)", self.name(), peers.len())
            }
            Event::ClientRelationJoined(req) | Event::ClientRelationChanged(req) => {
                write!(f, "{} ({}:{})", self.name(), req.relation_id, req.remote_unit)
            }
            Event::ClientRelationDeparted { relation_id, unit } => {
                write!(f, "{} ({relation_id}:{unit})", self.name())
            }
            _ => f.write_str(self.name()),
        }
    }
}
