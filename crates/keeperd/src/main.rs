//! keeperd — the keeper daemon.
//!
//! Assembles the keeper subsystems around one workload:
//! - State store (redb)
//! - Pod status API + readiness tracking
//! - Manifest applier
//! - Membership tracker and endpoint exchange
//! - Relation forwarder (`relation-set`)
//! - Event dispatcher
//!
//! # Usage
//!
//! ```text
//! keeperd --config /etc/keeper/keeper.toml hook config-changed --leader
//! keeperd hook client-relation-joined --unit kafka/0 --relation-id 4
//! keeperd hook cluster-relation-changed --peers zookeeper/1=10.1.0.6,zookeeper/2
//! keeperd run --interval 5m --leader-file /run/keeper/leader
//! keeperd status
//! ```

mod hook;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use keeper_core::{KeeperConfig, parse_duration};
use keeper_platform::{
    LeadershipOracle, LeaseFileLeadership, ManifestApplier, PodStatusApi, SpecApplier,
    StaticLeadership, StatusSource,
};
use keeper_reconcile::{CLIENT_RELATION, DispatchReport, Dispatcher, Event};
use keeper_relation::{HostResolver, RelationForwarder, RelationSetCommand, SystemResolver};
use keeper_state::StateStore;

use crate::hook::{HookContext, parse_event, parse_peers};

type Daemon = Dispatcher<PodStatusApi, ManifestApplier, SystemResolver, Option<RelationSetCommand>>;

type SharedLeadership = Arc<dyn LeadershipOracle + Send + Sync>;

#[derive(Parser)]
#[command(name = "keeperd", about = "Keeper reconciliation daemon")]
struct Cli {
    /// Path to keeper.toml.
    #[arg(long, global = true, default_value = "/etc/keeper/keeper.toml")]
    config: PathBuf,

    /// Data directory for persistent state.
    #[arg(long, global = true, default_value = "/var/lib/keeper")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deliver a single event (hook) and exit.
    Hook {
        /// Hook name, e.g. `config-changed` or `client-relation-joined`.
        event: String,

        /// Remote unit for relation hooks.
        #[arg(long)]
        unit: Option<String>,

        /// Relation id for client relation hooks.
        #[arg(long)]
        relation_id: Option<u32>,

        /// Ingress address published by the remote unit.
        #[arg(long)]
        ingress_address: Option<String>,

        /// Current peer listing, `unit[=address],...`, for cluster relation hooks.
        #[arg(long)]
        peers: Option<String>,

        /// Whether this unit is the elected leader.
        #[arg(long, env = "KEEPER_IS_LEADER")]
        leader: bool,

        /// Lease file naming the leader unit; overrides `--leader`.
        #[arg(long, env = "KEEPER_LEADER_FILE")]
        leader_file: Option<PathBuf>,
    },
    /// Deliver `start`, then `update-status` periodically until Ctrl-C.
    Run {
        /// Interval between status checks, e.g. `30s` or `5m`.
        #[arg(long, default_value = "5m")]
        interval: String,

        /// Whether this unit is the elected leader.
        #[arg(long, env = "KEEPER_IS_LEADER")]
        leader: bool,

        /// Lease file naming the leader unit, re-read on every tick.
        #[arg(long, env = "KEEPER_LEADER_FILE")]
        leader_file: Option<PathBuf>,
    },
    /// Print the persisted state as JSON.
    Status,
    /// Write a starter config for an application.
    Init {
        /// Application name.
        #[arg(long)]
        name: String,

        /// Workload image reference.
        #[arg(long)]
        image: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. Stdout carries hook output, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keeperd=debug,keeper=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Hook {
            event,
            unit,
            relation_id,
            ingress_address,
            peers,
            leader,
            leader_file,
        } => {
            let ctx = HookContext {
                unit,
                relation_id,
                ingress_address,
                peers: peers.as_deref().map(parse_peers).transpose()?,
            };
            let event = parse_event(&event, &ctx)?;
            let config = load_config(&cli.config)?;
            let leadership = leadership(leader, leader_file, &config.application.unit);
            run_hook(config, &cli.data_dir, event, leadership).await
        }
        Command::Run {
            interval,
            leader,
            leader_file,
        } => {
            let interval = parse_duration(&interval)
                .ok_or_else(|| anyhow::anyhow!("invalid interval '{interval}'"))?;
            let config = load_config(&cli.config)?;
            if leader_file.is_none() {
                warn!(leader, "no leader lease file; leadership is fixed for the daemon's lifetime");
            }
            let leadership = leadership(leader, leader_file, &config.application.unit);
            run_loop(config, &cli.data_dir, interval, leadership).await
        }
        Command::Status => print_status(&cli.data_dir),
        Command::Init { name, image } => init_config(&cli.config, &name, &image),
    }
}

fn load_config(path: &Path) -> anyhow::Result<KeeperConfig> {
    let config = KeeperConfig::from_file(path)?;
    info!(
        application = %config.application.name,
        unit = %config.application.unit,
        ha_mode = config.options.ha_mode,
        "config loaded"
    );
    Ok(config)
}

fn leadership(leader: bool, leader_file: Option<PathBuf>, unit: &str) -> SharedLeadership {
    match leader_file {
        Some(path) => {
            info!(path = %path.display(), unit, "leadership read from lease file");
            Arc::new(LeaseFileLeadership::new(path, unit))
        }
        None => Arc::new(StaticLeadership::new(leader)),
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("keeper.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

fn build_daemon(
    config: KeeperConfig,
    data_dir: &Path,
    leadership: SharedLeadership,
) -> anyhow::Result<Daemon> {
    let store = open_store(data_dir)?;
    let source = PodStatusApi::from_config(&config.platform)?;
    let applier = ManifestApplier::new(&config.platform.manifest_dir);
    let resolver = SystemResolver::from_config(&config.exchange);
    let forwarder = RelationSetCommand::new(&config.exchange.relation_set_command);
    if forwarder.is_none() {
        info!("no relation-set command configured; databags stay local");
    }
    Ok(Dispatcher::new(config, store, source, applier, resolver, leadership)?.with_forwarder(forwarder))
}

fn log_report(report: &DispatchReport) {
    info!(
        handled = report.handled.len(),
        applied = report.apply_count(),
        published = report.publications.len(),
        deferred = report.pending_deferred,
        status = %report.status,
        "dispatch complete"
    );
}

/// What `keeperd hook` prints: the unit status and every databag it published.
fn hook_output(report: &DispatchReport) -> serde_json::Value {
    let published: Vec<serde_json::Value> = report
        .publications
        .iter()
        .map(|p| {
            serde_json::json!({
                "relation": CLIENT_RELATION,
                "relation_id": p.relation_id,
                "databag": p.record.to_databag(),
                "changed": p.changed,
            })
        })
        .collect();
    serde_json::json!({
        "status": report.status,
        "published": published,
        "deferred": report.pending_deferred,
    })
}

async fn run_hook(
    config: KeeperConfig,
    data_dir: &Path,
    event: Event,
    leadership: SharedLeadership,
) -> anyhow::Result<()> {
    let mut daemon = build_daemon(config, data_dir, leadership)?;
    let report = daemon.dispatch(event).await?;
    log_report(&report);
    println!("{}", serde_json::to_string(&hook_output(&report))?);
    Ok(())
}

async fn run_loop(
    config: KeeperConfig,
    data_dir: &Path,
    interval: Duration,
    leadership: SharedLeadership,
) -> anyhow::Result<()> {
    info!(?interval, "keeper daemon starting");
    let mut daemon = build_daemon(config, data_dir, leadership.clone())?;
    let mut watch = LeadershipWatch::new(leadership.as_ref());

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; `start` covers it.
    ticker.tick().await;
    deliver(&mut daemon, Event::Start).await?;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let event = watch.next_event(leadership.as_ref());
                deliver(&mut daemon, event).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                deliver(&mut daemon, Event::Stop).await?;
                break;
            }
        }
    }

    info!("keeper daemon stopped");
    Ok(())
}

/// Turns leadership observed between ticks into the event to deliver.
struct LeadershipWatch {
    was_leader: bool,
}

impl LeadershipWatch {
    fn new(oracle: &dyn LeadershipOracle) -> Self {
        Self {
            was_leader: oracle.is_leader(),
        }
    }

    /// `leader-elected` when leadership was gained since the last tick,
    /// otherwise `update-status`.
    fn next_event(&mut self, oracle: &dyn LeadershipOracle) -> Event {
        let is_leader = oracle.is_leader();
        let was_leader = std::mem::replace(&mut self.was_leader, is_leader);
        match (was_leader, is_leader) {
            (false, true) => {
                info!("leadership gained");
                Event::LeaderElected
            }
            (true, false) => {
                info!("leadership lost");
                Event::UpdateStatus
            }
            _ => Event::UpdateStatus,
        }
    }
}

/// Dispatch one event; transient failures are logged and left for the next tick.
async fn deliver<S, A, R, F>(daemon: &mut Dispatcher<S, A, R, F>, event: Event) -> anyhow::Result<()>
where
    S: StatusSource,
    A: SpecApplier,
    R: HostResolver,
    F: RelationForwarder + Sync,
{
    match daemon.dispatch(event).await {
        Ok(report) => log_report(&report),
        Err(e) if e.is_transient() => {
            error!(error = %e, "event failed, retrying on next tick");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_status(data_dir: &Path) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    let state = store.get_reconciler_state()?;
    let cluster = store.get_cluster()?;
    let clients = store.get_clients()?;
    let fingerprint = state.last_applied_spec.as_ref().map(|s| s.fingerprint());
    let status = serde_json::json!({
        "phase": state.phase,
        "started": state.started,
        "last_applied_spec": state.last_applied_spec,
        "fingerprint": fingerprint,
        "replica_count": cluster.replica_count,
        "peers": cluster.peers,
        "clients": clients.relations,
        "databags": store.list_databags(CLIENT_RELATION)?,
        "deferred_events": store.deferred_count()?,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn init_config(config_path: &Path, name: &str, image: &str) -> anyhow::Result<()> {
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let config = KeeperConfig::scaffold(name, image);
    std::fs::write(config_path, config.to_toml_string()?)?;
    info!(path = %config_path.display(), "config written");
    Ok(())
}
