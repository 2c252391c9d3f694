//! EndpointExchange — publishes this unit's endpoint to client relations.
//!
//! The exchange never waits. A request that arrives before the workload
//! has started comes back as [`ExposeOutcome::Deferred`] and the runtime
//! re-delivers it after a later event.

use serde::Serialize;
use tracing::{debug, info};

use keeper_core::{ExchangeConfig, ExposureMode, Options};
use keeper_state::ClientRegistry;

use crate::client::PeerClient;
use crate::error::ExchangeResult;
use crate::record::{ClientRequest, EndpointRecord};
use crate::resolve::{HostResolver, local_hostname};

/// One endpoint publication on one relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Publication {
    pub relation_id: u32,
    pub record: EndpointRecord,
    /// False when the relation already held this exact record.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposeOutcome {
    /// Not started yet; re-deliver the request later.
    Deferred,
    /// Started, but publishing is left to the leader.
    NotLeader,
    Published(Vec<Publication>),
}

impl ExposeOutcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, ExposeOutcome::Deferred)
    }
}

pub struct EndpointExchange<R> {
    mode: ExposureMode,
    bind_address: Option<String>,
    client_port: u16,
    rest_port: u16,
    resolver: R,
    /// Remote units seen on each client relation.
    clients: ClientRegistry,
}

impl<R: HostResolver> EndpointExchange<R> {
    pub fn new(config: &ExchangeConfig, options: &Options, resolver: R) -> Self {
        Self {
            mode: config.mode,
            bind_address: config.bind_address.clone(),
            client_port: options.client_port,
            rest_port: options.effective_rest_port(),
            resolver,
            clients: ClientRegistry::default(),
        }
    }

    /// Replace the tracked client set with a persisted one.
    pub fn restore(&mut self, clients: ClientRegistry) {
        self.clients = clients;
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn mode(&self) -> ExposureMode {
        self.mode
    }

    /// A remote unit joined a client relation. Tracks it and exposes the
    /// endpoint right away.
    pub async fn on_peer_joined(
        &mut self,
        request: &ClientRequest,
        started: bool,
        is_leader: bool,
        client: &mut impl PeerClient,
    ) -> ExchangeResult<ExposeOutcome> {
        self.track(request);
        self.expose(request.relation_id, started, is_leader, client)
            .await
    }

    /// A remote unit left a client relation.
    pub fn on_peer_departed(&mut self, relation_id: u32, remote_unit: &str) -> bool {
        let Some(units) = self.clients.relations.get_mut(&relation_id) else {
            return false;
        };
        let before = units.len();
        units.retain(|u| u != remote_unit);
        let removed = units.len() != before;
        if units.is_empty() {
            self.clients.relations.remove(&relation_id);
            debug!(relation_id, "last client unit departed");
        }
        if removed {
            info!(relation_id, unit = %remote_unit, "client unit departed");
        }
        removed
    }

    /// A client asked (again) for the endpoint.
    pub async fn on_client_request(
        &mut self,
        request: &ClientRequest,
        started: bool,
        is_leader: bool,
        client: &mut impl PeerClient,
    ) -> ExchangeResult<ExposeOutcome> {
        self.track(request);
        self.expose(request.relation_id, started, is_leader, client)
            .await
    }

    fn track(&mut self, request: &ClientRequest) {
        let units = self
            .clients
            .relations
            .entry(request.relation_id)
            .or_default();
        if !units.contains(&request.remote_unit) {
            units.push(request.remote_unit.clone());
            info!(relation_id = request.relation_id, unit = %request.remote_unit, "client unit tracked");
        }
    }

    async fn expose(
        &self,
        relation_id: u32,
        started: bool,
        is_leader: bool,
        client: &mut impl PeerClient,
    ) -> ExchangeResult<ExposeOutcome> {
        if !started {
            info!(relation_id, "workload not started, deferring client request");
            return Ok(ExposeOutcome::Deferred);
        }

        let targets: Vec<u32> = match self.mode {
            ExposureMode::LeaderOnly if !is_leader => {
                debug!(relation_id, "not leader, leaving publication to the leader");
                return Ok(ExposeOutcome::NotLeader);
            }
            ExposureMode::LeaderOnly => vec![relation_id],
            ExposureMode::PerRelation => {
                let mut ids: Vec<u32> = self.clients.relations.keys().copied().collect();
                if !ids.contains(&relation_id) {
                    ids.push(relation_id);
                }
                ids
            }
        };

        let record = self.endpoint().await;
        let mut published = Vec::with_capacity(targets.len());
        for id in targets {
            let changed = client.serve(id, &record).await?;
            if changed {
                info!(relation_id = id, host = %record.host, port = record.port, "endpoint published");
            }
            published.push(Publication {
                relation_id: id,
                record: record.clone(),
                changed,
            });
        }
        Ok(ExposeOutcome::Published(published))
    }

    /// The record this unit publishes.
    pub async fn endpoint(&self) -> EndpointRecord {
        let host = match &self.bind_address {
            Some(address) => self.resolver.resolve_host(address).await,
            None => local_hostname().unwrap_or_else(|| "localhost".to_string()),
        };
        EndpointRecord {
            host,
            port: self.client_port,
            rest_port: self.rest_port,
        }
    }
}
