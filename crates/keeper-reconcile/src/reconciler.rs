//! Reconciler — decides on every trigger whether a new spec must be applied.
//!
//! Level-triggered: each trigger re-derives the whole desired state from
//! the current options and replica count instead of looking at what the
//! trigger changed.
//!
//! ```text
//! not leader: readiness only ──────────────► ReadyNonLeader | (unchanged)
//! leader:     build_spec ─ equal? ─ no ─► Configuring ─ apply ─┐
//!                            │ yes                              │
//!                            └──────────── readiness ◄──────────┘
//!                                          ready ─► Ready
//!                                          not ready ─► Configuring
//! ```

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use keeper_core::{DesiredSpec, Options, StartedPolicy, build_spec};
use keeper_platform::{ReadinessProbe, SpecApplier, StatusSource};
use keeper_state::{Phase, ReconcilerState};

use crate::error::ReconcileResult;
use crate::status::UnitStatus;

/// What caused a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Start,
    ConfigChanged,
    LeaderElected,
    MembershipChanged,
    UpdateStatus,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Trigger::Start => "start",
            Trigger::ConfigChanged => "config-changed",
            Trigger::LeaderElected => "leader-elected",
            Trigger::MembershipChanged => "membership-changed",
            Trigger::UpdateStatus => "update-status",
        };
        f.write_str(s)
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub trigger: Trigger,
    pub phase: Phase,
    /// Set when this pass applied a new spec.
    pub applied: Option<DesiredSpec>,
    pub ready: bool,
    pub started: bool,
    pub status: UnitStatus,
}

pub struct Reconciler<S, A> {
    name: String,
    readiness: ReadinessProbe<S>,
    applier: A,
    policy: StartedPolicy,
    state: ReconcilerState,
}

impl<S: StatusSource, A: SpecApplier> Reconciler<S, A> {
    /// `state` is the persisted state from a previous run, if any.
    pub fn new(
        name: &str,
        readiness: ReadinessProbe<S>,
        applier: A,
        policy: StartedPolicy,
        state: ReconcilerState,
    ) -> Self {
        Self {
            name: name.to_string(),
            readiness,
            applier,
            policy,
            state,
        }
    }

    pub fn state(&self) -> &ReconcilerState {
        &self.state
    }

    pub fn started(&self) -> bool {
        self.state.started
    }

    pub fn readiness(&self) -> &ReadinessProbe<S> {
        &self.readiness
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    /// Run one pass.
    ///
    /// On error nothing is changed, except that a spec the platform
    /// accepted is kept as `last_applied_spec` even if the readiness check
    /// that follows fails.
    pub async fn reconcile(
        &mut self,
        trigger: Trigger,
        is_leader: bool,
        options: &Options,
        replicas: u32,
    ) -> ReconcileResult<ReconcileReport> {
        // Status from an earlier trigger is never reused.
        self.readiness.invalidate();

        let mut applied = None;
        if is_leader {
            let spec = build_spec(&self.name, replicas, options.image.as_deref(), options.ports())?;
            if self.state.last_applied_spec.as_ref() == Some(&spec) {
                debug!(%trigger, replicas, "desired spec unchanged, not applying");
            } else {
                info!(
                    %trigger,
                    replicas,
                    fingerprint = %spec.fingerprint(),
                    "configuring: applying new spec"
                );
                self.applier.apply_spec(&spec).await?;
                self.state.last_applied_spec = Some(spec.clone());
                self.state.phase = Phase::Configuring;
                applied = Some(spec);
            }
        } else {
            debug!(%trigger, "not leader, checking readiness only");
        }

        let ready = self.readiness.is_ready().await?;
        self.observe_readiness(ready, is_leader);

        let status = self.status_for(ready, is_leader);
        Ok(ReconcileReport {
            trigger,
            phase: self.state.phase,
            applied,
            ready,
            started: self.state.started,
            status,
        })
    }

    fn observe_readiness(&mut self, ready: bool, is_leader: bool) {
        if ready {
            let phase = if is_leader {
                Phase::Ready
            } else {
                Phase::ReadyNonLeader
            };
            if !self.state.started || self.state.phase != phase {
                info!(%phase, "workload ready");
            }
            self.state.started = true;
            self.state.phase = phase;
            return;
        }

        info!(unit_name = %self.readiness.selector().unit, "workload not ready yet");
        if self.policy == StartedPolicy::FollowReadiness && self.state.started {
            info!("readiness lost, clearing started");
            self.state.started = false;
        }
        self.state.phase = if is_leader && self.state.last_applied_spec.is_some() {
            Phase::Configuring
        } else if self.state.started {
            self.state.phase
        } else {
            Phase::NotStarted
        };
    }

    fn status_for(&self, ready: bool, is_leader: bool) -> UnitStatus {
        if ready {
            UnitStatus::ready(is_leader)
        } else if self.state.started || self.state.last_applied_spec.is_some() {
            UnitStatus::pod_not_ready()
        } else {
            UnitStatus::waiting_for_pod()
        }
    }
}
