//! keeper.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::spec::PortSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KeeperConfig {
    pub application: ApplicationConfig,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

/// Identity of the managed application and of this unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApplicationConfig {
    /// Workload name, also the value of the platform's app label.
    pub name: String,
    /// Unit name of this instance, e.g. `zookeeper/0`.
    pub unit: String,
}

/// Operator-supplied charm options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Options {
    #[serde(default)]
    pub ha_mode: bool,
    /// Required at spec-build time, not at parse time.
    pub image: Option<String>,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    #[serde(default = "default_leader_election_port")]
    pub leader_election_port: u16,
    /// Published as `rest_port`; falls back to `client_port`.
    pub rest_port: Option<u16>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ha_mode: false,
            image: None,
            server_port: default_server_port(),
            client_port: default_client_port(),
            leader_election_port: default_leader_election_port(),
            rest_port: None,
        }
    }
}

impl Options {
    pub fn ports(&self) -> PortSet {
        PortSet {
            server: self.server_port,
            client: self.client_port,
            leader_election: self.leader_election_port,
        }
    }

    pub fn effective_rest_port(&self) -> u16 {
        self.rest_port.unwrap_or(self.client_port)
    }
}

/// Orchestration platform adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlatformConfig {
    /// Base URL of the status API, e.g. `http://127.0.0.1:8001`.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Label whose value is the application name.
    #[serde(default = "default_app_label")]
    pub app_label: String,
    /// Annotation whose value is the unit name.
    #[serde(default = "default_unit_annotation")]
    pub unit_annotation: String,
    /// Optional bearer token file.
    pub token_file: Option<String>,
    /// CA bundle for an `https://` API URL; the public roots otherwise.
    pub ca_file: Option<String>,
    /// Directory the applier writes manifests into.
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            namespace: default_namespace(),
            app_label: default_app_label(),
            unit_annotation: default_unit_annotation(),
            token_file: None,
            ca_file: None,
            manifest_dir: default_manifest_dir(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
        }
    }
}

impl PlatformConfig {
    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn retry_base_delay(&self) -> Duration {
        parse_duration(&self.retry_base_delay).unwrap_or(Duration::from_millis(500))
    }
}

/// Which relations receive the endpoint record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExposureMode {
    /// Only the leader publishes, and only to the requesting relation.
    #[default]
    LeaderOnly,
    /// Every unit publishes to every tracked client relation.
    PerRelation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExchangeConfig {
    /// Address this unit is bound to on the client relation.
    pub bind_address: Option<String>,
    #[serde(default)]
    pub mode: ExposureMode,
    /// Address → hostname pairs consulted before reverse DNS.
    #[serde(default)]
    pub host_overrides: BTreeMap<String, String>,
    /// Program and leading arguments that write this unit's databag on the
    /// runtime's relation, e.g. `["relation-set"]`. Empty keeps databags
    /// in the local store only.
    #[serde(default)]
    pub relation_set_command: Vec<String>,
}

/// Whether `started` can drop back to false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartedPolicy {
    /// Once started, always started.
    #[default]
    Sticky,
    /// `started` mirrors the latest readiness observation.
    FollowReadiness,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReconcilerConfig {
    #[serde(default)]
    pub started_policy: StartedPolicy,
}

impl KeeperConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeeperConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a single-unit config for the given application.
    pub fn scaffold(name: &str, image: &str) -> Self {
        KeeperConfig {
            application: ApplicationConfig {
                name: name.to_string(),
                unit: format!("{name}/0"),
            },
            options: Options {
                image: Some(image.to_string()),
                ..Default::default()
            },
            platform: PlatformConfig::default(),
            exchange: ExchangeConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn default_server_port() -> u16 {
    2888
}

fn default_client_port() -> u16 {
    2181
}

fn default_leader_election_port() -> u16 {
    3888
}

fn default_api_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_app_label() -> String {
    "app".to_string()
}

fn default_unit_annotation() -> String {
    "keeper.io/unit".to_string()
}

fn default_manifest_dir() -> String {
    "/var/lib/keeper/manifests".to_string()
}

fn default_request_timeout() -> String {
    "5s".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> String {
    "500ms".to_string()
}
