//! Status records returned by the platform and the source trait.

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::PlatformResult;

/// Condition name that gates readiness.
pub const CONTAINERS_READY: &str = "ContainersReady";

/// Phase reported for a running workload instance.
pub const PHASE_RUNNING: &str = "Running";

/// Identifies the locally-managed workload instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSelector {
    /// Label key the platform filters on, e.g. `app`.
    pub label_key: String,
    /// Label value, the application name.
    pub label_value: String,
    /// Annotation carrying the unit name.
    pub unit_annotation: String,
    /// Local unit name, e.g. `zookeeper/0`.
    pub unit: String,
}

impl StatusSelector {
    pub fn new(label_key: &str, label_value: &str, unit_annotation: &str, unit: &str) -> Self {
        Self {
            label_key: label_key.to_string(),
            label_value: label_value.to_string(),
            unit_annotation: unit_annotation.to_string(),
            unit: unit.to_string(),
        }
    }

    /// `key=value` form used in label selectors.
    pub fn label_selector(&self) -> String {
        format!("{}={}", self.label_key, self.label_value)
    }
}

/// A single status condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

/// Status of one workload instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl StatusRecord {
    /// True only if the named condition is present with status `"True"`.
    pub fn condition_is_true(&self, kind: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == kind && c.status == "True")
    }

    pub fn containers_ready(&self) -> bool {
        self.condition_is_true(CONTAINERS_READY)
    }

    pub fn is_running(&self) -> bool {
        self.phase.as_deref() == Some(PHASE_RUNNING)
    }
}

/// Something that can report the status of a workload instance.
///
/// `Ok(None)` means the platform has no matching record yet; it is not an
/// error. Transport and authorization failures are errors.
pub trait StatusSource {
    fn fetch_status(
        &self,
        selector: &StatusSelector,
    ) -> impl Future<Output = PlatformResult<Option<StatusRecord>>> + Send;
}
