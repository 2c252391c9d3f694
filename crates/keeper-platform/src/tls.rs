//! TLS client configuration for the pod status API.
//!
//! In-cluster API servers present a certificate signed by the cluster CA,
//! which is mounted next to the service-account token. When no CA file
//! is configured the Mozilla root set is trusted instead.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};

/// Build a `rustls` client config trusting `ca_file`, or the public roots.
pub fn client_config(ca_file: Option<&Path>) -> PlatformResult<Arc<rustls::ClientConfig>> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let pem = std::fs::read(path)?;
            let mut added = 0;
            for cert in rustls_pemfile::certs(&mut BufReader::new(pem.as_slice())) {
                roots
                    .add(cert?)
                    .map_err(|e| PlatformError::Tls(format!("{}: {e}", path.display())))?;
                added += 1;
            }
            if added == 0 {
                return Err(PlatformError::Tls(format!(
                    "no certificates in {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), certs = added, "cluster CA loaded");
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| PlatformError::Tls(format!("protocol versions: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::new(config))
}
