use thiserror::Error;

use keeper_state::StateError;

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("relation store error: {0}")]
    Store(#[from] StateError),

    #[error("cannot write databag {relation} through the runtime: {message}")]
    Forward { relation: String, message: String },
}

impl ExchangeError {
    /// A failed hand-off leaves the local databag untouched, so delivering
    /// the same event again retries it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Forward { .. })
    }
}
