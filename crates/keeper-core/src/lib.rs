//! keeper-core — shared types for the keeper controller.
//!
//! Holds the operator-facing configuration (`keeper.toml`), the
//! [`DesiredSpec`] document submitted to the orchestration platform, and
//! the pure [`build_spec`] function that derives one from the other.

pub mod config;
pub mod error;
pub mod spec;

pub use config::{
    ApplicationConfig, ExchangeConfig, ExposureMode, KeeperConfig, Options, PlatformConfig,
    ReconcilerConfig, StartedPolicy, parse_duration,
};
pub use error::SpecError;
pub use spec::{ContainerPort, ContainerSpec, DesiredSpec, PortSet, build_spec};
