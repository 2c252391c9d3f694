//! Hand-off of databag writes to the hosting runtime.
//!
//! The local store only remembers what this unit published. Remote units
//! see a databag once the runtime's relation tool has written it:
//!
//! ```text
//! relation-set -r zookeeper:4 host=zk-0.example port=2181 rest_port=2181
//! ```

use std::future::Future;

use tracing::debug;

use keeper_state::{Databag, RelationKey};

use crate::error::{ExchangeError, ExchangeResult};

/// Writes this unit's databag on the runtime's side of a relation.
pub trait RelationForwarder {
    /// Set every key in `data` on `key`'s relation. An empty value unsets
    /// the key.
    fn forward(
        &self,
        key: &RelationKey,
        data: &Databag,
    ) -> impl Future<Output = ExchangeResult<()>> + Send;
}

/// Keeps databags in the local store only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl RelationForwarder for LocalOnly {
    async fn forward(&self, _key: &RelationKey, _data: &Databag) -> ExchangeResult<()> {
        Ok(())
    }
}

impl<F: RelationForwarder + Sync> RelationForwarder for Option<F> {
    async fn forward(&self, key: &RelationKey, data: &Databag) -> ExchangeResult<()> {
        match self {
            Some(forwarder) => forwarder.forward(key, data).await,
            None => Ok(()),
        }
    }
}

/// Runs the runtime's relation tool once per databag write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSetCommand {
    program: String,
    args: Vec<String>,
}

impl RelationSetCommand {
    /// `argv` is the program followed by any leading arguments. `None`
    /// when `argv` is empty.
    pub fn new(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Arguments passed after the configured ones.
    pub fn arguments(&self, key: &RelationKey, data: &Databag) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("-r".to_string());
        args.push(format!("{}:{}", key.relation, key.relation_id));
        args.extend(data.iter().map(|(k, v)| format!("{k}={v}")));
        args
    }
}

impl RelationForwarder for RelationSetCommand {
    async fn forward(&self, key: &RelationKey, data: &Databag) -> ExchangeResult<()> {
        let args = self.arguments(key, data);
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| ExchangeError::Forward {
                relation: key.to_string(),
                message: format!("{}: {e}", self.program),
            })?;
        if !output.status.success() {
            return Err(ExchangeError::Forward {
                relation: key.to_string(),
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        debug!(%key, keys = data.len(), program = %self.program, "databag forwarded");
        Ok(())
    }
}
