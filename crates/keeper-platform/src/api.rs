//! HTTP status adapter for a Kubernetes-style pod API.
//!
//! Issues `GET {api}/api/v1/namespaces/{ns}/pods?labelSelector={key}={app}`
//! over HTTP/1.1, either in plain text against a local API proxy or over
//! TLS against the in-cluster API server, and reduces the pod list to the
//! one pod whose unit annotation names the local unit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use tokio_rustls::TlsConnector;
use tracing::debug;

use keeper_core::PlatformConfig;

use crate::error::{PlatformError, PlatformResult};
use crate::retry::RetryPolicy;
use crate::status::{Condition, StatusRecord, StatusSelector, StatusSource};
use crate::tls;

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMeta,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMeta {
    name: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Status source backed by the platform's pod API.
#[derive(Debug, Clone)]
pub struct PodStatusApi {
    endpoint: ApiEndpoint,
    namespace: String,
    token_file: Option<PathBuf>,
    /// Set for `https://` endpoints.
    tls: Option<Arc<rustls::ClientConfig>>,
    retry: RetryPolicy,
}

impl PodStatusApi {
    /// An API client for `api_url`. `https://` endpoints trust the public
    /// root set; use [`PodStatusApi::with_ca_file`] for a cluster CA.
    pub fn new(api_url: &str, namespace: &str, retry: RetryPolicy) -> PlatformResult<Self> {
        let endpoint = ApiEndpoint::parse(api_url)?;
        let tls = if endpoint.secure {
            Some(tls::client_config(None)?)
        } else {
            None
        };
        Ok(Self {
            endpoint,
            namespace: namespace.to_string(),
            token_file: None,
            tls,
            retry,
        })
    }

    pub fn from_config(config: &PlatformConfig) -> PlatformResult<Self> {
        let mut api = Self::new(
            &config.api_url,
            &config.namespace,
            RetryPolicy::from_config(config),
        )?;
        if let Some(path) = &config.token_file {
            api = api.with_token_file(path);
        }
        if let Some(path) = &config.ca_file {
            api = api.with_ca_file(Path::new(path))?;
        }
        Ok(api)
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// Verify the API server against the CA certificates in `path`.
    pub fn with_ca_file(mut self, path: &Path) -> PlatformResult<Self> {
        if !self.endpoint.secure {
            return Err(PlatformError::Tls(format!(
                "ca-file {} given for plain-HTTP endpoint {}",
                path.display(),
                self.endpoint.authority()
            )));
        }
        self.tls = Some(tls::client_config(Some(path))?);
        Ok(self)
    }

    /// Request path for the pods matching `selector`.
    pub fn pods_path(&self, selector: &StatusSelector) -> String {
        format!(
            "/api/v1/namespaces/{}/pods?labelSelector={}",
            encode_component(&self.namespace),
            encode_component(&selector.label_selector())
        )
    }

    async fn bearer_token(&self) -> PlatformResult<Option<String>> {
        match &self.token_file {
            Some(path) => {
                let token = tokio::fs::read_to_string(path).await?;
                Ok(Some(token.trim().to_string()))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, path: &str, token: Option<&str>) -> PlatformResult<Bytes> {
        let authority = self.endpoint.authority();
        let stream = tokio::net::TcpStream::connect(&authority)
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        match &self.tls {
            None => self.request(TokioIo::new(stream), path, token).await,
            Some(config) => {
                let host = &self.endpoint.host;
                let server_name = ServerName::try_from(host.clone())
                    .map_err(|e| PlatformError::Tls(format!("server name '{host}': {e}")))?;
                let stream = TlsConnector::from(Arc::clone(config))
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| PlatformError::Transport(format!("tls handshake: {e}")))?;
                self.request(TokioIo::new(stream), path, token).await
            }
        }
    }

    async fn request<I>(&self, io: I, path: &str, token: Option<&str>) -> PlatformResult<Bytes>
    where
        I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", self.endpoint.authority())
            .header("accept", "application/json")
            .header("user-agent", "keeper-platform/0.1");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?
            .to_bytes();

        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            return Err(PlatformError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        Ok(body)
    }
}

impl StatusSource for PodStatusApi {
    async fn fetch_status(
        &self,
        selector: &StatusSelector,
    ) -> PlatformResult<Option<StatusRecord>> {
        let path = self.pods_path(selector);
        let token = self.bearer_token().await?;
        let body = self
            .retry
            .run("fetch-status", || self.get(&path, token.as_deref()))
            .await?;
        let list: PodList =
            serde_json::from_slice(&body).map_err(|e| PlatformError::Decode(e.to_string()))?;
        debug!(pods = list.items.len(), %path, "pod list fetched");
        Ok(select_pod(list, selector))
    }
}

fn select_pod(list: PodList, selector: &StatusSelector) -> Option<StatusRecord> {
    list.items
        .into_iter()
        .find(|pod| {
            pod.metadata.annotations.get(&selector.unit_annotation) == Some(&selector.unit)
        })
        .map(|pod| StatusRecord {
            name: pod.metadata.name,
            phase: pod.status.phase,
            conditions: pod.status.conditions,
            annotations: pod.metadata.annotations,
        })
}

/// Scheme, host and port of the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiEndpoint {
    secure: bool,
    host: String,
    port: u16,
}

impl ApiEndpoint {
    fn parse(api_url: &str) -> PlatformResult<Self> {
        let api_url = api_url.trim();
        let (secure, rest) = if let Some(rest) = api_url.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = api_url.strip_prefix("http://") {
            (false, rest)
        } else {
            return Err(PlatformError::Transport(format!(
                "unsupported API URL '{api_url}', expected http:// or https://"
            )));
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    PlatformError::Transport(format!("API URL '{api_url}' has an invalid port"))
                })?;
                (host, port)
            }
            None => (authority, if secure { 443 } else { 80 }),
        };
        if host.is_empty() {
            return Err(PlatformError::Transport(format!(
                "API URL '{api_url}' has no host"
            )));
        }
        Ok(Self {
            secure,
            host: host.to_string(),
            port,
        })
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Percent-encode everything outside the unreserved set.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
