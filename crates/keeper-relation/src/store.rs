//! Relation databag storage.

use keeper_state::{Databag, RelationData, RelationKey, StateResult, StateStore};

/// Per-unit key/value namespaces on relations.
pub trait RelationStore {
    fn databag(&self, key: &RelationKey) -> StateResult<Databag>;

    /// Write a databag; returns false if it was already identical.
    fn write_databag(&self, key: &RelationKey, data: &Databag) -> StateResult<bool>;

    fn clear_databag(&self, key: &RelationKey) -> StateResult<bool>;

    fn databags(&self, relation: &str) -> StateResult<Vec<RelationData>>;
}

impl RelationStore for StateStore {
    fn databag(&self, key: &RelationKey) -> StateResult<Databag> {
        self.get_databag(key)
    }

    fn write_databag(&self, key: &RelationKey, data: &Databag) -> StateResult<bool> {
        self.put_databag(key, data)
    }

    fn clear_databag(&self, key: &RelationKey) -> StateResult<bool> {
        self.delete_databag(key)
    }

    fn databags(&self, relation: &str) -> StateResult<Vec<RelationData>> {
        self.list_databags(relation)
    }
}
