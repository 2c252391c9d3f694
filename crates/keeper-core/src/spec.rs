//! Desired spec document and its builder.
//!
//! [`build_spec`] is pure: identical inputs always produce equal
//! [`DesiredSpec`] values and byte-identical JSON, which is what lets the
//! reconciler skip an apply when nothing changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SpecError;

/// The three ports a replicated coordinator listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSet {
    /// Peer-to-peer quorum traffic.
    pub server: u16,
    /// Client connections.
    pub client: u16,
    /// Leader election traffic.
    pub leader_election: u16,
}

impl PortSet {
    fn named(&self) -> [(&'static str, u16); 3] {
        [
            ("client-port", self.client),
            ("server-port", self.server),
            ("leader-election-port", self.leader_election),
        ]
    }
}

/// A container port entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u16,
    pub protocol: String,
}

/// The single container of the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub ports: Vec<ContainerPort>,
    pub env: BTreeMap<String, String>,
}

/// Declarative description of the workload submitted to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredSpec {
    pub name: String,
    pub replicas: u32,
    pub image: String,
    pub ports: PortSet,
    pub containers: Vec<ContainerSpec>,
}

impl DesiredSpec {
    /// Hex SHA-256 of the canonical JSON encoding.
    pub fn fingerprint(&self) -> String {
        // Field order is fixed by the struct and env is a BTreeMap, so the
        // encoding is canonical.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the desired spec for `replicas` instances of `image`.
pub fn build_spec(
    name: &str,
    replicas: u32,
    image: Option<&str>,
    ports: PortSet,
) -> Result<DesiredSpec, SpecError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SpecError::MissingName);
    }
    if replicas == 0 {
        return Err(SpecError::NonPositiveReplicas);
    }
    let image = match image.map(str::trim) {
        Some(image) if !image.is_empty() => image,
        _ => return Err(SpecError::MissingImage),
    };
    validate_ports(&ports)?;

    let command = vec![
        "start-zookeeper".to_string(),
        format!("--servers={replicas}"),
        format!("--client_port={}", ports.client),
        format!("--election_port={}", ports.leader_election),
        format!("--server_port={}", ports.server),
    ];

    let container_ports = ports
        .named()
        .iter()
        .map(|(port_name, port)| ContainerPort {
            name: port_name.to_string(),
            container_port: *port,
            protocol: "TCP".to_string(),
        })
        .collect();

    let mut env = BTreeMap::new();
    env.insert("KEEPER_APPLICATION".to_string(), name.to_string());
    env.insert("KEEPER_REPLICAS".to_string(), replicas.to_string());

    Ok(DesiredSpec {
        name: name.to_string(),
        replicas,
        image: image.to_string(),
        ports,
        containers: vec![ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            command,
            ports: container_ports,
            env,
        }],
    })
}

fn validate_ports(ports: &PortSet) -> Result<(), SpecError> {
    let named = ports.named();
    for (name, port) in named {
        if port == 0 {
            return Err(SpecError::InvalidPort { name });
        }
    }
    for (i, (first, a)) in named.iter().enumerate() {
        for (second, b) in &named[i + 1..] {
            if a == b {
                return Err(SpecError::PortConflict {
                    first: *first,
                    second: *second,
                    port: *a,
                });
            }
        }
    }
    Ok(())
}
