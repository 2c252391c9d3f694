//! Dispatcher — the single-threaded event runtime.
//!
//! One event is handled to completion before the next one starts. A
//! handler never recurses into another handler; it pushes follow-up events
//! onto the dispatcher's queue instead. Handlers that cannot do their work
//! yet return `Deferred`; such events are persisted once (a re-delivered
//! copy of a pending event is not stored again) and replayed, oldest
//! first, after every later dispatch drains its queue.
//!
//! ```text
//! dispatch(event)
//!   ├── queue: event, follow-ups …      (FIFO, persist after each)
//!   └── replay deferred events by seq   (still deferred → keep seq)
//! ```

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use keeper_cluster::{MembershipChange, MembershipTracker};
use keeper_core::KeeperConfig;
use keeper_platform::{
    LeadershipOracle, ReadinessProbe, SpecApplier, StatusSelector, StatusSource,
};
use keeper_relation::{
    EndpointExchange, ExposeOutcome, HostResolver, LocalOnly, Publication, RelationClient,
    RelationForwarder,
};
use keeper_state::{ReconcilerState, StateStore};

use crate::error::{ReconcileError, ReconcileResult};
use crate::event::Event;
use crate::reconciler::{ReconcileReport, Reconciler, Trigger};
use crate::status::UnitStatus;

/// Relation endpoint clients connect through.
pub const CLIENT_RELATION: &str = "zookeeper";

enum Handled {
    Done,
    Deferred,
}

/// What one call to [`Dispatcher::dispatch`] did.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Every event handled, follow-ups and replays included, in order.
    pub handled: Vec<String>,
    pub reconciles: Vec<ReconcileReport>,
    pub publications: Vec<Publication>,
    /// Events deferred for the first time.
    pub newly_deferred: usize,
    /// Deferred events that completed on replay.
    pub replayed: usize,
    /// Deferred events still waiting afterwards.
    pub pending_deferred: u64,
    pub status: UnitStatus,
}

impl DispatchReport {
    /// Number of specs applied during this dispatch.
    pub fn apply_count(&self) -> usize {
        self.reconciles.iter().filter(|r| r.applied.is_some()).count()
    }
}

pub struct Dispatcher<S, A, R, F = LocalOnly> {
    config: KeeperConfig,
    store: StateStore,
    /// Makes databag writes visible on the runtime's relations.
    forwarder: F,
    leadership: Box<dyn LeadershipOracle + Send + Sync>,
    reconciler: Reconciler<S, A>,
    membership: MembershipTracker,
    exchange: EndpointExchange<R>,
    queue: VecDeque<Event>,
    status: UnitStatus,
}

impl<S: StatusSource, A: SpecApplier, R: HostResolver> Dispatcher<S, A, R> {
    /// Build a dispatcher, restoring persisted state from `store`. Databags
    /// stay in the store until [`Dispatcher::with_forwarder`] is used.
    pub fn new(
        config: KeeperConfig,
        store: StateStore,
        source: S,
        applier: A,
        resolver: R,
        leadership: impl LeadershipOracle + Send + Sync + 'static,
    ) -> ReconcileResult<Self> {
        let selector = StatusSelector::new(
            &config.platform.app_label,
            &config.application.name,
            &config.platform.unit_annotation,
            &config.application.unit,
        );
        let state = store.get_reconciler_state()?;
        info!(
            unit = %config.application.unit,
            phase = %state.phase,
            started = state.started,
            "restored reconciler state"
        );
        let reconciler = Reconciler::new(
            &config.application.name,
            ReadinessProbe::new(source, selector),
            applier,
            config.reconciler.started_policy,
            state,
        );
        let membership = MembershipTracker::load(&store, config.options.ha_mode)?;
        let mut exchange = EndpointExchange::new(&config.exchange, &config.options, resolver);
        exchange.restore(store.get_clients()?);

        Ok(Self {
            config,
            store,
            forwarder: LocalOnly,
            leadership: Box::new(leadership),
            reconciler,
            membership,
            exchange,
            queue: VecDeque::new(),
            status: UnitStatus::default(),
        })
    }

    /// Hand every databag change to `forwarder` as well.
    pub fn with_forwarder<G: RelationForwarder>(self, forwarder: G) -> Dispatcher<S, A, R, G> {
        Dispatcher {
            config: self.config,
            store: self.store,
            forwarder,
            leadership: self.leadership,
            reconciler: self.reconciler,
            membership: self.membership,
            exchange: self.exchange,
            queue: self.queue,
            status: self.status,
        }
    }
}

impl<S, A, R, F> Dispatcher<S, A, R, F>
where
    S: StatusSource,
    A: SpecApplier,
    R: HostResolver,
    F: RelationForwarder + Sync,
{
    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn state(&self) -> &ReconcilerState {
        self.reconciler.state()
    }

    pub fn reconciler(&self) -> &Reconciler<S, A> {
        &self.reconciler
    }

    pub fn membership(&self) -> &MembershipTracker {
        &self.membership
    }

    pub fn exchange(&self) -> &EndpointExchange<R> {
        &self.exchange
    }

    /// Status computed by the most recent reconciliation.
    pub fn status(&self) -> &UnitStatus {
        &self.status
    }

    /// Deliver one event, its follow-ups, then replay deferred events.
    ///
    /// A failing handler aborts the dispatch; state committed up to that
    /// point is persisted and queued follow-ups are dropped.
    pub async fn dispatch(&mut self, event: Event) -> ReconcileResult<DispatchReport> {
        let mut report = DispatchReport::default();
        // Only events deferred by earlier dispatches are replayed.
        let backlog: Vec<(u64, Event)> = self.store.list_deferred()?;
        self.queue.push_back(event);

        let mut result = self.drain(&mut report).await;
        if result.is_ok() {
            result = self.replay_deferred(backlog, &mut report).await;
        }
        if let Err(e) = result {
            self.queue.clear();
            warn!(error = %e, transient = e.is_transient(), "event handling failed");
            return Err(e);
        }

        report.pending_deferred = self.store.deferred_count()?;
        report.status = self.status.clone();
        Ok(report)
    }

    async fn drain(&mut self, report: &mut DispatchReport) -> ReconcileResult<()> {
        while let Some(event) = self.queue.pop_front() {
            let handled = self.handle(&event, report).await;
            self.persist()?;
            if let Handled::Deferred = handled? {
                self.defer(&event, report)?;
            }
        }
        Ok(())
    }

    fn defer(&self, event: &Event, report: &mut DispatchReport) -> ReconcileResult<()> {
        let pending: Vec<(u64, Event)> = self.store.list_deferred()?;
        if let Some((seq, _)) = pending.iter().find(|(_, queued)| queued == event) {
            debug!(seq, %event, "already deferred");
            return Ok(());
        }
        let seq = self.store.push_deferred(event)?;
        report.newly_deferred += 1;
        debug!(seq, %event, "event deferred");
        Ok(())
    }

    async fn replay_deferred(
        &mut self,
        backlog: Vec<(u64, Event)>,
        report: &mut DispatchReport,
    ) -> ReconcileResult<()> {
        for (seq, event) in backlog {
            debug!(seq, %event, "replaying deferred event");
            let handled = self.handle(&event, report).await;
            self.persist()?;
            match handled? {
                Handled::Done => {
                    self.store.remove_deferred(seq)?;
                    report.replayed += 1;
                }
                Handled::Deferred => debug!(seq, %event, "still deferred"),
            }
            self.drain(report).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, event: &Event, report: &mut DispatchReport) -> ReconcileResult<Handled> {
        // Leadership can move between any two events.
        let is_leader = self.leadership.is_leader();
        info!(%event, is_leader, "handling event");
        report.handled.push(event.to_string());

        match event {
            Event::Start | Event::LeaderElected | Event::UpdateStatus => {
                let trigger = event.trigger().unwrap_or(Trigger::UpdateStatus);
                self.reconcile(trigger, is_leader, report).await
            }
            Event::ConfigChanged => {
                // ha-mode may differ from what the persisted count was built with.
                self.membership.set_ha_mode(self.config.options.ha_mode);
                self.reconcile(Trigger::ConfigChanged, is_leader, report).await
            }
            Event::Upgrade => {
                info!("upgrade: re-deriving configuration");
                self.queue.push_back(Event::ConfigChanged);
                Ok(Handled::Done)
            }
            Event::Stop => {
                info!("stop requested");
                Ok(Handled::Done)
            }
            Event::ClusterRelationJoined {
                unit,
                ingress_address,
            } => {
                let change = self.membership.on_peer_joined(unit, ingress_address.clone());
                self.on_membership(change, is_leader, report).await
            }
            Event::ClusterRelationDeparted { unit } => {
                let change = self.membership.on_peer_departed(unit);
                self.on_membership(change, is_leader, report).await
            }
            Event::ClusterRelationChanged { peers } => {
                let change = self.membership.sync_peers(peers);
                self.on_membership(change, is_leader, report).await
            }
            Event::ClientRelationJoined(request) => {
                let mut client =
                    RelationClient::new(&self.store, CLIENT_RELATION, &self.config.application.unit)
                        .forwarding(&self.forwarder);
                let outcome = self
                    .exchange
                    .on_peer_joined(request, self.reconciler.started(), is_leader, &mut client)
                    .await?;
                Ok(record_outcome(outcome, report))
            }
            Event::ClientRelationChanged(request) => {
                let mut client =
                    RelationClient::new(&self.store, CLIENT_RELATION, &self.config.application.unit)
                        .forwarding(&self.forwarder);
                let outcome = self
                    .exchange
                    .on_client_request(request, self.reconciler.started(), is_leader, &mut client)
                    .await?;
                Ok(record_outcome(outcome, report))
            }
            Event::ClientRelationDeparted { relation_id, unit } => {
                self.exchange.on_peer_departed(*relation_id, unit);
                if !self.exchange.clients().relations.contains_key(relation_id) {
                    let mut client = RelationClient::new(
                        &self.store,
                        CLIENT_RELATION,
                        &self.config.application.unit,
                    )
                    .forwarding(&self.forwarder);
                    client.withdraw(*relation_id).await?;
                }
                Ok(Handled::Done)
            }
        }
    }

    async fn reconcile(
        &mut self,
        trigger: Trigger,
        is_leader: bool,
        report: &mut DispatchReport,
    ) -> ReconcileResult<Handled> {
        let replicas = self.membership.current_replica_count();
        match self
            .reconciler
            .reconcile(trigger, is_leader, &self.config.options, replicas)
            .await
        {
            Ok(result) => {
                self.status = result.status.clone();
                report.reconciles.push(result);
                Ok(Handled::Done)
            }
            Err(ReconcileError::InvalidSpec(e)) => {
                warn!(error = %e, "configuration cannot produce a spec");
                self.status = UnitStatus::Blocked(e.to_string());
                Ok(Handled::Done)
            }
            Err(e) => Err(e),
        }
    }

    async fn on_membership(
        &mut self,
        change: MembershipChange,
        is_leader: bool,
        report: &mut DispatchReport,
    ) -> ReconcileResult<Handled> {
        match change {
            MembershipChange::Resized { from, to } => {
                info!(from, to, "cluster resized");
                self.reconcile(Trigger::MembershipChanged, is_leader, report)
                    .await
            }
            MembershipChange::Unchanged => Ok(Handled::Done),
        }
    }

    fn persist(&self) -> ReconcileResult<()> {
        self.store.put_reconciler_state(self.reconciler.state())?;
        self.membership.save(&self.store)?;
        self.store.put_clients(self.exchange.clients())?;
        Ok(())
    }
}

fn record_outcome(outcome: ExposeOutcome, report: &mut DispatchReport) -> Handled {
    match outcome {
        ExposeOutcome::Deferred => Handled::Deferred,
        ExposeOutcome::NotLeader => Handled::Done,
        ExposeOutcome::Published(list) => {
            report.publications.extend(list);
            Handled::Done
        }
    }
}
