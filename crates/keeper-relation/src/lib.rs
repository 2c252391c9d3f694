//! keeper-relation — exposes this unit's endpoint to dependent services.
//!
//! ```text
//! client-relation-joined / -changed
//!   └── EndpointExchange
//!       ├── started? no  → Deferred (runtime re-delivers later)
//!       ├── leader-only and not leader → NotLeader
//!       └── HostResolver(bind address) → EndpointRecord
//!           └── PeerClient::serve → databag {host, port, rest_port}
//!               ├── RelationForwarder → runtime relation (relation-set)
//!               └── local store (last published value)
//! ```
//!
//! Publication is idempotent: serving an identical record leaves the
//! databag untouched and reports `changed == false`.

pub mod client;
pub mod error;
pub mod exchange;
pub mod forward;
pub mod record;
pub mod resolve;
pub mod store;

pub use client::{PeerClient, RelationClient};
pub use error::{ExchangeError, ExchangeResult};
pub use exchange::{EndpointExchange, ExposeOutcome, Publication};
pub use forward::{LocalOnly, RelationForwarder, RelationSetCommand};
pub use record::{ClientRequest, EndpointRecord};
pub use resolve::{HostResolver, ReverseHosts, SystemResolver};
pub use store::RelationStore;
