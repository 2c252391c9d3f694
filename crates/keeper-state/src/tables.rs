//! redb table definitions for the keeper state store.
//!
//! String-keyed tables hold JSON-serialized records. Deferred events use
//! a `u64` sequence key so iteration order is delivery order.

use redb::TableDefinition;

/// Reconciler state under the single key [`RECONCILER_KEY`].
pub const RECONCILER: TableDefinition<&str, &[u8]> = TableDefinition::new("reconciler");

/// Peer set and client registry, keyed by [`PEERS_KEY`] / [`CLIENTS_KEY`].
pub const MEMBERSHIP: TableDefinition<&str, &[u8]> = TableDefinition::new("membership");

/// Relation databags keyed by `{relation}:{relation_id}/{unit}`.
pub const RELATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("relations");

/// Deferred events keyed by sequence number.
pub const DEFERRED: TableDefinition<u64, &[u8]> = TableDefinition::new("deferred");

pub const RECONCILER_KEY: &str = "state";
pub const PEERS_KEY: &str = "peers";
pub const CLIENTS_KEY: &str = "clients";
