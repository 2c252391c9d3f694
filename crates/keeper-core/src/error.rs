//! Error types for desired-spec construction.

use thiserror::Error;

/// Invalid input to [`crate::build_spec`]. The spec is never applied when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("workload name must not be empty")]
    MissingName,

    #[error("replica count must be positive")]
    NonPositiveReplicas,

    #[error("image reference is required")]
    MissingImage,

    #[error("{name} must be a non-zero port")]
    InvalidPort { name: &'static str },

    #[error("{first} and {second} share port {port}")]
    PortConflict {
        first: &'static str,
        second: &'static str,
        port: u16,
    },
}
