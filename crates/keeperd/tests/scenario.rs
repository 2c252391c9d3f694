//! End-to-end scenarios: dispatcher, reconciler, membership and exchange
//! wired together over in-memory fakes of the platform.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use keeper_core::{DesiredSpec, KeeperConfig};
use keeper_platform::{
    Condition, PlatformError, PlatformResult, SpecApplier, StaticLeadership, StatusRecord,
    StatusSelector, StatusSource,
};
use keeper_reconcile::{CLIENT_RELATION, Dispatcher, Event, UnitStatus};
use keeper_relation::{
    ClientRequest, EndpointRecord, ExchangeResult, RelationClient, RelationForwarder,
    SystemResolver,
};
use keeper_state::{Databag, PeerEntry, Phase, RelationKey, StateStore};

// ── Fakes ──────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct FakePlatform {
    ready: Arc<Mutex<bool>>,
    fail_status: Arc<Mutex<bool>>,
    applied: Arc<Mutex<Vec<DesiredSpec>>>,
    status_calls: Arc<AtomicUsize>,
}

impl FakePlatform {
    fn set_ready(&self, ready: bool) {
        *self.ready.lock().unwrap() = ready;
    }

    fn set_failing(&self, failing: bool) {
        *self.fail_status.lock().unwrap() = failing;
    }

    fn applied_replicas(&self) -> Vec<u32> {
        self.applied.lock().unwrap().iter().map(|s| s.replicas).collect()
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl StatusSource for FakePlatform {
    async fn fetch_status(&self, selector: &StatusSelector) -> PlatformResult<Option<StatusRecord>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_status.lock().unwrap() {
            return Err(PlatformError::Transport("connection refused".into()));
        }
        let ready = *self.ready.lock().unwrap();
        Ok(Some(StatusRecord {
            name: selector.unit.replace('/', "-"),
            phase: Some("Running".to_string()),
            conditions: vec![Condition {
                kind: "ContainersReady".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
            }],
            ..Default::default()
        }))
    }
}

impl SpecApplier for FakePlatform {
    async fn apply_spec(&self, spec: &DesiredSpec) -> PlatformResult<()> {
        self.applied.lock().unwrap().push(spec.clone());
        Ok(())
    }
}

/// Stands in for the runtime's relation tool.
#[derive(Clone, Default)]
struct RecordedRelations {
    writes: Arc<Mutex<Vec<(String, Databag)>>>,
}

impl RecordedRelations {
    fn writes(&self) -> Vec<(String, Databag)> {
        self.writes.lock().unwrap().clone()
    }
}

impl RelationForwarder for RecordedRelations {
    async fn forward(&self, key: &RelationKey, data: &Databag) -> ExchangeResult<()> {
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), data.clone()));
        Ok(())
    }
}

type TestDispatcher = Dispatcher<FakePlatform, FakePlatform, SystemResolver>;

fn config(ha_mode: bool) -> KeeperConfig {
    let mut config = KeeperConfig::scaffold("zookeeper", "zk:3.9");
    config.options.ha_mode = ha_mode;
    config.exchange.bind_address = Some("10.1.0.5".to_string());
    config
        .exchange
        .host_overrides
        .insert("10.1.0.5".to_string(), "zk-0.example".to_string());
    config
}

fn resolver(config: &KeeperConfig) -> SystemResolver {
    SystemResolver::new(config.exchange.host_overrides.clone(), "").without_system_dns()
}

fn dispatcher(
    config: KeeperConfig,
    store: StateStore,
    platform: &FakePlatform,
    leadership: &StaticLeadership,
) -> TestDispatcher {
    let resolver = resolver(&config);
    Dispatcher::new(
        config,
        store,
        platform.clone(),
        platform.clone(),
        resolver,
        leadership.clone(),
    )
    .unwrap()
}

fn peer(unit: &str) -> PeerEntry {
    PeerEntry {
        unit: unit.to_string(),
        ingress_address: None,
    }
}

fn peer_joined(unit: &str) -> Event {
    Event::ClusterRelationJoined {
        unit: unit.to_string(),
        ingress_address: None,
    }
}

// ── End-to-end ─────────────────────────────────────────────────────

#[tokio::test]
async fn end_to_end_sizing_scenario() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let mut d = dispatcher(config(true), StateStore::open_in_memory().unwrap(), &platform, &leader);

    // No peers, leader: one apply with a single replica.
    d.dispatch(Event::Start).await.unwrap();
    assert_eq!(platform.applied_replicas(), vec![1]);

    // Two peers arrive before the next trigger.
    let listing = vec![peer("zookeeper/1"), peer("zookeeper/2")];
    let report = d
        .dispatch(Event::ClusterRelationChanged {
            peers: listing.clone(),
        })
        .await
        .unwrap();
    assert_eq!(report.apply_count(), 1);
    assert_eq!(platform.applied_replicas(), vec![1, 3]);

    // Same peer count reported again: no apply.
    let report = d
        .dispatch(Event::ClusterRelationChanged { peers: listing })
        .await
        .unwrap();
    assert_eq!(report.apply_count(), 0);
    assert_eq!(platform.applied_replicas(), vec![1, 3]);
}

#[tokio::test]
async fn peer_listing_drops_departed_units() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let mut d = dispatcher(config(true), StateStore::open_in_memory().unwrap(), &platform, &leader);

    d.dispatch(Event::ClusterRelationChanged {
        peers: vec![peer("zookeeper/1"), peer("zookeeper/2")],
    })
    .await
    .unwrap();
    d.dispatch(Event::ClusterRelationChanged {
        peers: vec![peer("zookeeper/2")],
    })
    .await
    .unwrap();

    assert_eq!(platform.applied_replicas(), vec![3, 2]);
    let units: Vec<&str> = d.membership().peers().units().collect();
    assert_eq!(units, vec!["zookeeper/2"]);
}

#[tokio::test]
async fn peer_joins_drive_respecs_through_dispatcher() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let mut d = dispatcher(config(true), StateStore::open_in_memory().unwrap(), &platform, &leader);

    let report = d.dispatch(Event::Start).await.unwrap();
    assert_eq!(report.apply_count(), 1);

    let report = d.dispatch(peer_joined("zookeeper/1")).await.unwrap();
    assert_eq!(report.handled, vec!["cluster-relation-joined (zookeeper/1)"]);
    assert_eq!(report.reconciles[0].trigger.to_string(), "membership-changed");
    let report = d.dispatch(peer_joined("zookeeper/2")).await.unwrap();
    assert_eq!(report.apply_count(), 1);
    assert_eq!(platform.applied_replicas(), vec![1, 2, 3]);

    // A rejoin leaves the count alone: no reconcile, no apply.
    let report = d.dispatch(peer_joined("zookeeper/2")).await.unwrap();
    assert!(report.reconciles.is_empty());
    d.dispatch(Event::UpdateStatus).await.unwrap();
    assert_eq!(platform.applied_replicas(), vec![1, 2, 3]);

    let report = d
        .dispatch(Event::ClusterRelationDeparted {
            unit: "zookeeper/1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(report.apply_count(), 1);
    assert_eq!(platform.applied_replicas(), vec![1, 2, 3, 2]);
}

// ── Leadership ─────────────────────────────────────────────────────

#[tokio::test]
async fn leadership_flip_stops_applying() {
    let platform = FakePlatform::default();
    platform.set_ready(true);
    let leader = StaticLeadership::new(true);
    let mut d = dispatcher(config(true), StateStore::open_in_memory().unwrap(), &platform, &leader);

    d.dispatch(Event::Start).await.unwrap();
    assert_eq!(platform.applied_replicas(), vec![1]);
    assert_eq!(d.status(), &UnitStatus::ready(true));

    leader.set(false);
    d.dispatch(Event::LeaderElected).await.unwrap();
    d.dispatch(peer_joined("zookeeper/1")).await.unwrap();
    d.dispatch(Event::ConfigChanged).await.unwrap();
    d.dispatch(Event::UpdateStatus).await.unwrap();

    assert_eq!(platform.applied_replicas(), vec![1]);
    assert_eq!(d.state().phase, Phase::ReadyNonLeader);
    assert_eq!(d.status(), &UnitStatus::ready(false));

    platform.set_ready(false);
    d.dispatch(Event::UpdateStatus).await.unwrap();
    assert_eq!(d.status(), &UnitStatus::pod_not_ready());
    assert_eq!(platform.applied_replicas(), vec![1]);
}

#[tokio::test]
async fn non_leader_never_applies() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(false);
    let mut d = dispatcher(config(true), StateStore::open_in_memory().unwrap(), &platform, &leader);

    for event in [
        Event::Start,
        peer_joined("zookeeper/1"),
        peer_joined("zookeeper/2"),
        Event::ConfigChanged,
        Event::Upgrade,
        Event::UpdateStatus,
    ] {
        d.dispatch(event).await.unwrap();
    }
    assert!(platform.applied_replicas().is_empty());
    assert!(d.state().last_applied_spec.is_none());
}

// ── Sizing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn ha_mode_controls_replica_count() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);

    let mut single = dispatcher(config(false), StateStore::open_in_memory().unwrap(), &platform, &leader);
    for i in 1..=5 {
        single.dispatch(peer_joined(&format!("zookeeper/{i}"))).await.unwrap();
    }
    assert_eq!(single.membership().current_replica_count(), 1);

    let mut ha = dispatcher(config(true), StateStore::open_in_memory().unwrap(), &platform, &leader);
    for i in 1..=3 {
        ha.dispatch(peer_joined(&format!("zookeeper/{i}"))).await.unwrap();
    }
    assert_eq!(ha.membership().current_replica_count(), 4);
    assert_eq!(ha.state().last_applied_spec.as_ref().unwrap().replicas, 4);
}

// ── Client exchange ────────────────────────────────────────────────

#[tokio::test]
async fn client_request_deferred_then_served() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let store = StateStore::open_in_memory().unwrap();
    let mut d = dispatcher(config(false), store.clone(), &platform, &leader);

    let request = ClientRequest {
        relation_id: 4,
        remote_unit: "kafka/0".to_string(),
        ingress_address: Some("10.2.0.7".to_string()),
    };
    let report = d
        .dispatch(Event::ClientRelationJoined(request.clone()))
        .await
        .unwrap();
    assert_eq!(report.newly_deferred, 1);
    assert_eq!(report.pending_deferred, 1);
    assert!(report.publications.is_empty());

    // Still not ready: the request stays deferred.
    let report = d.dispatch(Event::Start).await.unwrap();
    assert_eq!(report.replayed, 0);
    assert_eq!(report.pending_deferred, 1);

    platform.set_ready(true);
    let report = d.dispatch(Event::UpdateStatus).await.unwrap();
    assert!(d.state().started);
    assert_eq!(report.replayed, 1);
    assert_eq!(report.pending_deferred, 0);
    assert_eq!(report.publications.len(), 1);

    let record = &report.publications[0].record;
    assert!(!record.host.is_empty());
    assert_eq!(
        record,
        &EndpointRecord {
            host: "zk-0.example".to_string(),
            port: 2181,
            rest_port: 2181,
        }
    );

    let client = RelationClient::new(&store, CLIENT_RELATION, "zookeeper/0");
    assert_eq!(client.published(4).unwrap().as_ref(), Some(record));

    // Re-delivery of the same request changes nothing on the relation.
    let report = d
        .dispatch(Event::ClientRelationChanged(request))
        .await
        .unwrap();
    assert!(!report.publications[0].changed);
}

#[tokio::test]
async fn redelivered_request_is_deferred_once() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let store = StateStore::open_in_memory().unwrap();
    let mut d = dispatcher(config(false), store.clone(), &platform, &leader);

    let request = ClientRequest::new(4, "kafka/0");
    let mut newly_deferred = 0;
    for _ in 0..5 {
        let report = d
            .dispatch(Event::ClientRelationChanged(request.clone()))
            .await
            .unwrap();
        newly_deferred += report.newly_deferred;
        assert_eq!(report.pending_deferred, 1);
    }
    assert_eq!(newly_deferred, 1);

    platform.set_ready(true);
    let report = d.dispatch(Event::UpdateStatus).await.unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(report.publications.len(), 1);
    assert_eq!(report.pending_deferred, 0);
}

#[tokio::test]
async fn deferred_events_replay_in_order_and_keep_their_sequence() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let store = StateStore::open_in_memory().unwrap();
    let mut d = dispatcher(config(false), store.clone(), &platform, &leader);

    d.dispatch(Event::ClientRelationJoined(ClientRequest::new(4, "kafka/0")))
        .await
        .unwrap();
    d.dispatch(Event::ClientRelationJoined(ClientRequest::new(7, "solr/0")))
        .await
        .unwrap();
    let before: Vec<(u64, Event)> = store.list_deferred().unwrap();
    assert_eq!(before.len(), 2);

    d.dispatch(Event::UpdateStatus).await.unwrap();
    let after: Vec<(u64, Event)> = store.list_deferred().unwrap();
    assert_eq!(before, after);

    platform.set_ready(true);
    let report = d.dispatch(Event::UpdateStatus).await.unwrap();
    let ids: Vec<u32> = report.publications.iter().map(|p| p.relation_id).collect();
    assert_eq!(ids, vec![4, 7]);
}

#[tokio::test]
async fn non_leader_completes_client_request_without_publishing() {
    let platform = FakePlatform::default();
    platform.set_ready(true);
    let leader = StaticLeadership::new(false);
    let mut d = dispatcher(config(false), StateStore::open_in_memory().unwrap(), &platform, &leader);

    d.dispatch(Event::UpdateStatus).await.unwrap();
    let report = d
        .dispatch(Event::ClientRelationJoined(ClientRequest::new(4, "kafka/0")))
        .await
        .unwrap();
    assert!(report.publications.is_empty());
    assert_eq!(report.pending_deferred, 0);
}

#[tokio::test]
async fn last_client_departure_withdraws_endpoint() {
    let platform = FakePlatform::default();
    platform.set_ready(true);
    let leader = StaticLeadership::new(true);
    let store = StateStore::open_in_memory().unwrap();
    let mut d = dispatcher(config(false), store.clone(), &platform, &leader);

    d.dispatch(Event::Start).await.unwrap();
    d.dispatch(Event::ClientRelationJoined(ClientRequest::new(4, "kafka/0")))
        .await
        .unwrap();
    let client = RelationClient::new(&store, CLIENT_RELATION, "zookeeper/0");
    assert!(client.published(4).unwrap().is_some());

    d.dispatch(Event::ClientRelationDeparted {
        relation_id: 4,
        unit: "kafka/0".to_string(),
    })
    .await
    .unwrap();
    assert!(client.published(4).unwrap().is_none());
    assert!(store.get_clients().unwrap().relations.is_empty());
}

#[tokio::test]
async fn databag_changes_reach_the_runtime() {
    let platform = FakePlatform::default();
    platform.set_ready(true);
    let leader = StaticLeadership::new(true);
    let runtime = RecordedRelations::default();
    let mut d = dispatcher(config(false), StateStore::open_in_memory().unwrap(), &platform, &leader)
        .with_forwarder(runtime.clone());

    d.dispatch(Event::Start).await.unwrap();
    d.dispatch(Event::ClientRelationJoined(ClientRequest::new(4, "kafka/0")))
        .await
        .unwrap();
    // Nothing changed: nothing handed to the runtime.
    d.dispatch(Event::ClientRelationChanged(ClientRequest::new(4, "kafka/0")))
        .await
        .unwrap();

    let writes = runtime.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, "zookeeper:4/zookeeper/0");
    assert_eq!(writes[0].1.get("host").map(String::as_str), Some("zk-0.example"));
    assert_eq!(writes[0].1.get("port").map(String::as_str), Some("2181"));

    d.dispatch(Event::ClientRelationDeparted {
        relation_id: 4,
        unit: "kafka/0".to_string(),
    })
    .await
    .unwrap();
    let writes = runtime.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes[1].1.values().all(String::is_empty));
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn upgrade_reemits_config_changed() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let mut d = dispatcher(config(false), StateStore::open_in_memory().unwrap(), &platform, &leader);

    let report = d.dispatch(Event::Upgrade).await.unwrap();
    assert_eq!(report.handled, vec!["upgrade", "config-changed"]);
    assert_eq!(report.apply_count(), 1);
}

#[tokio::test]
async fn missing_image_blocks_without_applying() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let mut cfg = config(false);
    cfg.options.image = None;
    let mut d = dispatcher(cfg, StateStore::open_in_memory().unwrap(), &platform, &leader);

    let report = d.dispatch(Event::ConfigChanged).await.unwrap();
    assert!(report.status.is_blocked());
    assert!(platform.applied_replicas().is_empty());
    assert!(d.state().last_applied_spec.is_none());
}

#[tokio::test]
async fn transient_failure_is_retried_on_next_trigger() {
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);
    let mut d = dispatcher(config(false), StateStore::open_in_memory().unwrap(), &platform, &leader);

    platform.set_failing(true);
    let err = d.dispatch(Event::Start).await.unwrap_err();
    assert!(err.is_transient());
    // The apply went through before the readiness check failed.
    assert_eq!(platform.applied_replicas(), vec![1]);

    platform.set_failing(false);
    platform.set_ready(true);
    let report = d.dispatch(Event::UpdateStatus).await.unwrap();
    assert_eq!(report.apply_count(), 0);
    assert!(report.status.is_active());
}

// ── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn restart_trusts_applied_spec_but_refetches_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.redb");
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);

    {
        let store = StateStore::open(&db_path).unwrap();
        let mut d = dispatcher(config(true), store, &platform, &leader);
        d.dispatch(Event::Start).await.unwrap();
        d.dispatch(peer_joined("zookeeper/1")).await.unwrap();
        d.dispatch(Event::ClientRelationJoined(ClientRequest::new(4, "kafka/0")))
            .await
            .unwrap();
        assert_eq!(platform.applied_replicas(), vec![1, 2]);
    }

    let calls_before = platform.status_calls();
    platform.set_ready(true);
    let store = StateStore::open(&db_path).unwrap();
    let mut d = dispatcher(config(true), store, &platform, &leader);
    assert_eq!(d.membership().cached_replica_count(), 2);
    assert_eq!(d.state().last_applied_spec.as_ref().unwrap().replicas, 2);
    assert!(!d.state().started);

    let report = d.dispatch(Event::UpdateStatus).await.unwrap();
    assert_eq!(report.apply_count(), 0);
    assert!(platform.status_calls() > calls_before);
    assert!(d.state().started);
    // The client request deferred before the restart is served now.
    assert_eq!(report.replayed, 1);
    assert_eq!(report.pending_deferred, 0);
}

#[tokio::test]
async fn ha_mode_change_across_restart_resizes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("keeper.redb");
    let platform = FakePlatform::default();
    let leader = StaticLeadership::new(true);

    {
        let mut d = dispatcher(config(true), StateStore::open(&db_path).unwrap(), &platform, &leader);
        d.dispatch(peer_joined("zookeeper/1")).await.unwrap();
        d.dispatch(peer_joined("zookeeper/2")).await.unwrap();
    }
    assert_eq!(platform.applied_replicas().last(), Some(&3));

    let mut d = dispatcher(config(false), StateStore::open(&db_path).unwrap(), &platform, &leader);
    d.dispatch(Event::ConfigChanged).await.unwrap();
    assert_eq!(platform.applied_replicas().last(), Some(&1));
    assert_eq!(d.membership().peers().len(), 2);
}
