//! Failures of the keeper state store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    /// A redb transaction, table or record operation failed.
    #[error("state store {op} failed: {message}")]
    Storage { op: &'static str, message: String },

    /// A record could not be encoded, or what is stored is not a valid record.
    #[error("state record `{key}` is invalid: {source}")]
    Record {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
