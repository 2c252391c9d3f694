//! keeper-reconcile — the reconciliation state machine and its runtime.
//!
//! # Components
//!
//! - **`reconciler`** — level-triggered state machine (NotStarted →
//!   Configuring → Ready / ReadyNonLeader). Only the leader builds and
//!   applies specs; every unit tracks readiness.
//! - **`dispatch`** — delivers one event at a time, queues follow-ups,
//!   persists state after each event and replays deferred events.
//! - **`event`** — the events the runtime delivers.
//! - **`status`** — operator-visible unit status.

pub mod dispatch;
pub mod error;
pub mod event;
pub mod reconciler;
pub mod status;

pub use dispatch::{CLIENT_RELATION, DispatchReport, Dispatcher};
pub use error::{ReconcileError, ReconcileResult};
pub use event::Event;
pub use reconciler::{ReconcileReport, Reconciler, Trigger};
pub use status::UnitStatus;
