//! Mapping of hook names and arguments to events.

use anyhow::{Context, bail};

use keeper_reconcile::Event;
use keeper_relation::ClientRequest;
use keeper_state::PeerEntry;

/// Arguments that accompany a relation hook.
#[derive(Debug, Default, Clone)]
pub struct HookContext {
    pub unit: Option<String>,
    pub relation_id: Option<u32>,
    pub ingress_address: Option<String>,
    /// Every remote unit currently on the peer relation.
    pub peers: Option<Vec<PeerEntry>>,
}

impl HookContext {
    fn unit(&self, hook: &str) -> anyhow::Result<String> {
        self.unit
            .clone()
            .with_context(|| format!("{hook} requires --unit"))
    }

    fn relation_id(&self, hook: &str) -> anyhow::Result<u32> {
        self.relation_id
            .with_context(|| format!("{hook} requires --relation-id"))
    }

    fn client_request(&self, hook: &str) -> anyhow::Result<ClientRequest> {
        Ok(ClientRequest {
            relation_id: self.relation_id(hook)?,
            remote_unit: self.unit(hook)?,
            ingress_address: self.ingress_address.clone(),
        })
    }
}

/// Build the event for a hook name such as `config-changed`.
pub fn parse_event(hook: &str, ctx: &HookContext) -> anyhow::Result<Event> {
    // A full listing replaces the peer set in one step.
    if hook.starts_with("cluster-relation-")
        && let Some(peers) = &ctx.peers
    {
        return Ok(Event::ClusterRelationChanged {
            peers: peers.clone(),
        });
    }
    let event = match hook {
        "start" => Event::Start,
        "stop" => Event::Stop,
        "config-changed" => Event::ConfigChanged,
        "upgrade" | "upgrade-charm" => Event::Upgrade,
        "leader-elected" => Event::LeaderElected,
        "update-status" => Event::UpdateStatus,
        "cluster-relation-joined" => Event::ClusterRelationJoined {
            unit: ctx.unit(hook)?,
            ingress_address: ctx.ingress_address.clone(),
        },
        "cluster-relation-departed" => Event::ClusterRelationDeparted {
            unit: ctx.unit(hook)?,
        },
        "cluster-relation-changed" => bail!("{hook} requires --peers"),
        "client-relation-joined" => Event::ClientRelationJoined(ctx.client_request(hook)?),
        "client-relation-changed" => Event::ClientRelationChanged(ctx.client_request(hook)?),
        "client-relation-departed" => Event::ClientRelationDeparted {
            relation_id: ctx.relation_id(hook)?,
            unit: ctx.unit(hook)?,
        },
        other => bail!("unknown hook '{other}'"),
    };
    Ok(event)
}

/// Parse a peer listing: `unit[=ingress-address]`, comma separated. An
/// empty listing means no peers remain.
pub fn parse_peers(listing: &str) -> anyhow::Result<Vec<PeerEntry>> {
    listing
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (unit, address) = match item.split_once('=') {
                Some((unit, address)) => (unit.trim(), Some(address.trim())),
                None => (item, None),
            };
            if !unit.contains('/') {
                bail!("peer '{unit}' is not a unit name (expected app/N)");
            }
            Ok(PeerEntry {
                unit: unit.to_string(),
                ingress_address: address.filter(|a| !a.is_empty()).map(str::to_string),
            })
        })
        .collect()
}
