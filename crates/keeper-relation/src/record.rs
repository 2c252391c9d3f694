//! Relation payloads.

use serde::{Deserialize, Serialize};

use keeper_state::Databag;

pub const HOST_KEY: &str = "host";
pub const PORT_KEY: &str = "port";
pub const REST_PORT_KEY: &str = "rest_port";

/// Endpoint a client uses to reach this unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub host: String,
    pub port: u16,
    pub rest_port: u16,
}

impl EndpointRecord {
    pub fn to_databag(&self) -> Databag {
        let mut bag = Databag::new();
        bag.insert(HOST_KEY.to_string(), self.host.clone());
        bag.insert(PORT_KEY.to_string(), self.port.to_string());
        bag.insert(REST_PORT_KEY.to_string(), self.rest_port.to_string());
        bag
    }

    /// Read a record back; `None` if any key is missing or malformed.
    pub fn from_databag(bag: &Databag) -> Option<Self> {
        Some(Self {
            host: bag.get(HOST_KEY)?.clone(),
            port: bag.get(PORT_KEY)?.parse().ok()?,
            rest_port: bag.get(REST_PORT_KEY)?.parse().ok()?,
        })
    }
}

/// A dependent service asking for this unit's endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub relation_id: u32,
    pub remote_unit: String,
    #[serde(default)]
    pub ingress_address: Option<String>,
}

impl ClientRequest {
    pub fn new(relation_id: u32, remote_unit: &str) -> Self {
        Self {
            relation_id,
            remote_unit: remote_unit.to_string(),
            ingress_address: None,
        }
    }
}
