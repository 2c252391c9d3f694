//! StateStore — redb-backed state persistence for keeper.
//!
//! Provides typed access to the reconciler state, membership records,
//! relation databags and the deferred-event queue. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Wrap a redb error as `StateError::Storage` tagged with the operation.
macro_rules! storage {
    ($op:literal) => {
        |e| StateError::Storage {
            op: $op,
            message: e.to_string(),
        }
    };
}

fn invalid(key: &str) -> impl FnOnce(serde_json::Error) -> StateError + '_ {
    move |source| StateError::Record {
        key: key.to_string(),
        source,
    }
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(storage!("transaction"))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RECONCILER).map_err(storage!("open table"))?;
        txn.open_table(MEMBERSHIP).map_err(storage!("open table"))?;
        txn.open_table(RELATIONS).map_err(storage!("open table"))?;
        txn.open_table(DEFERRED).map_err(storage!("open table"))?;
        txn.commit().map_err(storage!("transaction"))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(storage!("transaction"))?;
        let table = txn.open_table(table).map_err(storage!("open table"))?;
        match table.get(key).map_err(storage!("read"))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(invalid(key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(invalid(key))?;
        let txn = self.db.begin_write().map_err(storage!("transaction"))?;
        {
            let mut table = txn.open_table(table).map_err(storage!("open table"))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(storage!("write"))?;
        }
        txn.commit().map_err(storage!("transaction"))?;
        Ok(())
    }

    // ── Reconciler ─────────────────────────────────────────────────

    /// Load the reconciler state; a fresh store yields the default state.
    pub fn get_reconciler_state(&self) -> StateResult<ReconcilerState> {
        Ok(self
            .get_json(RECONCILER, RECONCILER_KEY)?
            .unwrap_or_default())
    }

    pub fn put_reconciler_state(&self, state: &ReconcilerState) -> StateResult<()> {
        self.put_json(RECONCILER, RECONCILER_KEY, state)?;
        debug!(started = state.started, phase = %state.phase, "reconciler state stored");
        Ok(())
    }

    // ── Membership ─────────────────────────────────────────────────

    pub fn get_cluster(&self) -> StateResult<ClusterRecord> {
        Ok(self.get_json(MEMBERSHIP, PEERS_KEY)?.unwrap_or_default())
    }

    pub fn put_cluster(&self, record: &ClusterRecord) -> StateResult<()> {
        self.put_json(MEMBERSHIP, PEERS_KEY, record)
    }

    pub fn get_clients(&self) -> StateResult<ClientRegistry> {
        Ok(self.get_json(MEMBERSHIP, CLIENTS_KEY)?.unwrap_or_default())
    }

    pub fn put_clients(&self, registry: &ClientRegistry) -> StateResult<()> {
        self.put_json(MEMBERSHIP, CLIENTS_KEY, registry)
    }

    // ── Relations ──────────────────────────────────────────────────

    /// Get a databag; an unknown key yields an empty one.
    pub fn get_databag(&self, key: &RelationKey) -> StateResult<Databag> {
        let record: Option<RelationData> = self.get_json(RELATIONS, &key.table_key())?;
        Ok(record.map(|r| r.data).unwrap_or_default())
    }

    /// Store a databag. Returns false without writing when the stored
    /// databag is already identical.
    pub fn put_databag(&self, key: &RelationKey, data: &Databag) -> StateResult<bool> {
        let table_key = key.table_key();
        let existing: Option<RelationData> = self.get_json(RELATIONS, &table_key)?;
        if existing.as_ref().is_some_and(|r| &r.data == data) {
            debug!(%key, "databag unchanged");
            return Ok(false);
        }
        let record = RelationData {
            key: key.clone(),
            data: data.clone(),
        };
        self.put_json(RELATIONS, &table_key, &record)?;
        debug!(%key, "databag stored");
        Ok(true)
    }

    /// Delete a databag. Returns true if it existed.
    pub fn delete_databag(&self, key: &RelationKey) -> StateResult<bool> {
        let table_key = key.table_key();
        let txn = self.db.begin_write().map_err(storage!("transaction"))?;
        let existed;
        {
            let mut table = txn.open_table(RELATIONS).map_err(storage!("open table"))?;
            existed = table
                .remove(table_key.as_str())
                .map_err(storage!("write"))?
                .is_some();
        }
        txn.commit().map_err(storage!("transaction"))?;
        Ok(existed)
    }

    /// List every databag stored for a relation endpoint name.
    pub fn list_databags(&self, relation: &str) -> StateResult<Vec<RelationData>> {
        let prefix = format!("{relation}:");
        let txn = self.db.begin_read().map_err(storage!("transaction"))?;
        let table = txn.open_table(RELATIONS).map_err(storage!("open table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(storage!("read"))? {
            let (key, value) = entry.map_err(storage!("read"))?;
            if key.value().starts_with(&prefix) {
                let record: RelationData = serde_json::from_slice(value.value())
                    .map_err(invalid(key.value()))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    // ── Deferred events ────────────────────────────────────────────

    /// Append an event to the deferred queue and return its sequence number.
    pub fn push_deferred<T: Serialize>(&self, event: &T) -> StateResult<u64> {
        let bytes = serde_json::to_vec(event).map_err(invalid("deferred"))?;
        let txn = self.db.begin_write().map_err(storage!("transaction"))?;
        let seq;
        {
            let mut table = txn.open_table(DEFERRED).map_err(storage!("open table"))?;
            let last = table
                .last()
                .map_err(storage!("read"))?
                .map(|(key, _)| key.value());
            seq = last.map_or(1, |n| n + 1);
            table
                .insert(seq, bytes.as_slice())
                .map_err(storage!("write"))?;
        }
        txn.commit().map_err(storage!("transaction"))?;
        debug!(seq, "event deferred");
        Ok(seq)
    }

    /// All deferred events in delivery order.
    pub fn list_deferred<T: DeserializeOwned>(&self) -> StateResult<Vec<(u64, T)>> {
        let txn = self.db.begin_read().map_err(storage!("transaction"))?;
        let table = txn.open_table(DEFERRED).map_err(storage!("open table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(storage!("read"))? {
            let (key, value) = entry.map_err(storage!("read"))?;
            let event: T = serde_json::from_slice(value.value())
                .map_err(invalid(&format!("deferred/{}", key.value())))?;
            results.push((key.value(), event));
        }
        Ok(results)
    }

    /// Remove a deferred event once it has been handled. Returns true if it existed.
    pub fn remove_deferred(&self, seq: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(storage!("transaction"))?;
        let existed;
        {
            let mut table = txn.open_table(DEFERRED).map_err(storage!("open table"))?;
            existed = table.remove(seq).map_err(storage!("write"))?.is_some();
        }
        txn.commit().map_err(storage!("transaction"))?;
        debug!(seq, existed, "deferred event removed");
        Ok(existed)
    }

    pub fn deferred_count(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(storage!("transaction"))?;
        let table = txn.open_table(DEFERRED).map_err(storage!("open table"))?;
        table.len().map_err(storage!("read"))
    }
}
