use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Failures talking to the orchestration platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("not authorized by platform API (HTTP {0})")]
    Unauthorized(u16),

    #[error("platform API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to decode platform response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    /// Connectivity failures are worth retrying within one request;
    /// everything else is returned to the caller immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlatformError::Transport(_) | PlatformError::Timeout(_))
    }
}
