//! keeper-state — durable state for the keeper controller.
//!
//! Backed by [redb](https://docs.rs/redb). Holds everything that must
//! survive a process restart between two events:
//!
//! - the reconciler's last-applied spec, `started` flag and phase
//! - the peer set and cached replica count
//! - relation databags (the key/value data exchanged with other units)
//! - deferred events awaiting re-delivery
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns.
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
