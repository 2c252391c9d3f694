//! Operator-visible unit status.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum UnitStatus {
    Maintenance(String),
    Active(String),
    Waiting(String),
    Blocked(String),
}

impl UnitStatus {
    pub fn ready(is_leader: bool) -> Self {
        if is_leader {
            UnitStatus::Active("ready".to_string())
        } else {
            UnitStatus::Active("ready (not leader)".to_string())
        }
    }

    pub fn pod_not_ready() -> Self {
        UnitStatus::Maintenance("pod is not ready".to_string())
    }

    pub fn waiting_for_pod() -> Self {
        UnitStatus::Waiting("waiting for pod".to_string())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, UnitStatus::Active(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, UnitStatus::Blocked(_))
    }

    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Maintenance(m)
            | UnitStatus::Active(m)
            | UnitStatus::Waiting(m)
            | UnitStatus::Blocked(m) => m,
        }
    }

    fn state(&self) -> &'static str {
        match self {
            UnitStatus::Maintenance(_) => "maintenance",
            UnitStatus::Active(_) => "active",
            UnitStatus::Waiting(_) => "waiting",
            UnitStatus::Blocked(_) => "blocked",
        }
    }
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::waiting_for_pod()
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state(), self.message())
    }
}
