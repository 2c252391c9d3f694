//! Spec application.

use std::future::Future;
use std::path::{Path, PathBuf};

use keeper_core::DesiredSpec;
use tracing::{debug, info};

use crate::error::{PlatformError, PlatformResult};

/// Submits a desired spec to the orchestration platform.
///
/// Applying a spec that is already in place must be a no-op.
pub trait SpecApplier {
    fn apply_spec(&self, spec: &DesiredSpec) -> impl Future<Output = PlatformResult<()>> + Send;
}

/// Applies specs by writing them as JSON manifests into a directory
/// watched by the platform.
#[derive(Debug, Clone)]
pub struct ManifestApplier {
    dir: PathBuf,
}

impl ManifestApplier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Read back the manifest currently in place for `name`, if any.
    pub async fn current(&self, name: &str) -> PlatformResult<Option<DesiredSpec>> {
        match tokio::fs::read(self.manifest_path(name)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PlatformError::Decode(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> PlatformResult<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl SpecApplier for ManifestApplier {
    async fn apply_spec(&self, spec: &DesiredSpec) -> PlatformResult<()> {
        let mut body = spec
            .to_json_pretty()
            .map_err(|e| PlatformError::Decode(e.to_string()))?;
        body.push('\n');
        let path = self.manifest_path(&spec.name);

        let existing = tokio::fs::read(&path).await.ok();
        if existing.as_deref() == Some(body.as_bytes()) {
            debug!(path = %path.display(), "manifest already up to date");
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        Self::write_atomic(&path, body.as_bytes()).await?;
        info!(
            path = %path.display(),
            replicas = spec.replicas,
            fingerprint = %spec.fingerprint(),
            "manifest applied"
        );
        Ok(())
    }
}
