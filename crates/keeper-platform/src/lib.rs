//! keeper-platform — the orchestration platform as seen by the reconciler.
//!
//! The reconciler only talks to the platform through three capabilities:
//!
//! ```text
//! StatusSource      fetch_status(selector) → Option<StatusRecord>
//! SpecApplier       apply_spec(DesiredSpec)
//! LeadershipOracle  is_leader()
//! ```
//!
//! `ReadinessProbe` wraps a `StatusSource` with a per-tick cache and the
//! `ContainersReady` predicate. `PodStatusApi` and `ManifestApplier` are
//! the concrete adapters the daemon wires in; both bound their I/O with a
//! `RetryPolicy` and a per-request timeout.

pub mod api;
pub mod apply;
pub mod error;
pub mod leader;
pub mod probe;
pub mod retry;
pub mod status;
pub mod tls;

pub use api::PodStatusApi;
pub use apply::{ManifestApplier, SpecApplier};
pub use error::{PlatformError, PlatformResult};
pub use leader::{LeadershipOracle, LeaseFileLeadership, StaticLeadership};
pub use probe::ReadinessProbe;
pub use retry::RetryPolicy;
pub use status::{Condition, StatusRecord, StatusSelector, StatusSource};
