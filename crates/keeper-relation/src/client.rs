//! Client capability used by the exchange to publish endpoints.

use std::future::Future;

use tracing::debug;

use keeper_state::{Databag, RelationKey};

use crate::error::ExchangeResult;
use crate::forward::{LocalOnly, RelationForwarder};
use crate::record::EndpointRecord;
use crate::store::RelationStore;

/// Something that can hand an endpoint record to the far side of a relation.
pub trait PeerClient {
    /// Publish `record` on `relation_id`. Returns true if anything changed.
    fn serve(
        &mut self,
        relation_id: u32,
        record: &EndpointRecord,
    ) -> impl Future<Output = ExchangeResult<bool>> + Send;
}

static LOCAL_ONLY: LocalOnly = LocalOnly;

/// Publishes by writing the local unit's databag on a named relation.
///
/// The store keeps the last published databag so an identical record is
/// not written twice; the forwarder makes each change visible on the
/// runtime's relation.
pub struct RelationClient<'a, T, F = LocalOnly> {
    store: &'a T,
    forwarder: &'a F,
    relation: String,
    local_unit: String,
}

impl<'a, T: RelationStore> RelationClient<'a, T> {
    pub fn new(store: &'a T, relation: &str, local_unit: &str) -> Self {
        Self {
            store,
            forwarder: &LOCAL_ONLY,
            relation: relation.to_string(),
            local_unit: local_unit.to_string(),
        }
    }
}

impl<'a, T: RelationStore, F: RelationForwarder> RelationClient<'a, T, F> {
    /// Forward every databag change through `forwarder`.
    pub fn forwarding<G: RelationForwarder>(self, forwarder: &'a G) -> RelationClient<'a, T, G> {
        RelationClient {
            store: self.store,
            forwarder,
            relation: self.relation,
            local_unit: self.local_unit,
        }
    }

    pub fn key(&self, relation_id: u32) -> RelationKey {
        RelationKey::new(&self.relation, relation_id, &self.local_unit)
    }

    /// The record currently published on `relation_id`, if any.
    pub fn published(&self, relation_id: u32) -> ExchangeResult<Option<EndpointRecord>> {
        let bag = self.store.databag(&self.key(relation_id))?;
        Ok(EndpointRecord::from_databag(&bag))
    }

    /// Drop what was published on `relation_id`.
    pub async fn withdraw(&mut self, relation_id: u32) -> ExchangeResult<bool> {
        let key = self.key(relation_id);
        let bag = self.store.databag(&key)?;
        if bag.is_empty() {
            return Ok(false);
        }
        let cleared: Databag = bag.keys().map(|k| (k.clone(), String::new())).collect();
        self.forwarder.forward(&key, &cleared).await?;
        debug!(%key, "endpoint withdrawn");
        Ok(self.store.clear_databag(&key)?)
    }
}

impl<T, F> PeerClient for RelationClient<'_, T, F>
where
    T: RelationStore + Sync,
    F: RelationForwarder + Sync,
{
    async fn serve(&mut self, relation_id: u32, record: &EndpointRecord) -> ExchangeResult<bool> {
        let key = self.key(relation_id);
        let current = self.store.databag(&key)?;
        // Merge so keys written by others on the same databag survive.
        let mut bag = current.clone();
        bag.extend(record.to_databag());
        if bag == current {
            debug!(%key, "endpoint already published");
            return Ok(false);
        }
        // Forward first: a failed hand-off must not look published locally.
        self.forwarder.forward(&key, &bag).await?;
        self.store.write_databag(&key, &bag)?;
        debug!(%key, host = %record.host, "endpoint served");
        Ok(true)
    }
}
