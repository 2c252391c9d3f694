//! keeper-cluster — membership of the cluster-internal peer relation.
//!
//! ```text
//! cluster-relation-joined / -departed / -changed (full listing)
//!   └── MembershipTracker
//!       ├── PeerSet (join-ordered, unique units)
//!       ├── ha-mode override (pins the count to 1)
//!       └── MembershipChange::Resized → owner reconciles
//! ```
//!
//! The tracker is a plain value. Its owner restores it from the
//! `StateStore` before an event and saves it afterwards.

pub mod membership;
pub mod peers;

pub use membership::{MembershipChange, MembershipTracker};
pub use peers::PeerSet;
