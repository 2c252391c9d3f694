use thiserror::Error;

use keeper_core::SpecError;
use keeper_platform::PlatformError;
use keeper_relation::ExchangeError;
use keeper_state::StateError;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("invalid spec input: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("endpoint exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

impl ReconcileError {
    /// Platform failures and failed databag hand-offs clear up on their
    /// own; the next trigger retries.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Platform(_) => true,
            ReconcileError::Exchange(e) => e.is_retryable(),
            _ => false,
        }
    }
}
