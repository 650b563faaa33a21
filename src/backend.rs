//! HTTP client for the reflection gateway.
//!
//! Every endpoint answers with a `{error?, data}` envelope. This module turns
//! that duck-typed shape into `Result<T, BackendError>`: a non-empty `error`
//! becomes [`BackendError::Application`], network and status failures become
//! the transport variants, and `data` is decoded into the caller's type.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::target::encode_uri;

/// Header telling the gateway whether to dial the target over TLS.
pub const USE_TLS_HEADER: &str = "use_tls";

/// Multipart field carrying local proto files.
pub const PROTOS_FIELD: &str = "protos";

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The gateway handled the request and reported a failure.
    #[error("{0}")]
    Application(String),

    #[error("server returned status {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Status {
        status: StatusCode,
        message: Option<String>,
    },

    #[error("could not connect to gateway at {0}; is it running?")]
    Connect(String),

    #[error("request to gateway at {0} timed out")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("failed to read proto file {}: {}", .0.display(), .1)]
    Proto(PathBuf, #[source] std::io::Error),

    #[error("invalid gateway url {0:?}")]
    InvalidBaseUrl(String),
}

impl BackendError {
    /// Whether this failure was reported by the gateway itself rather than
    /// by the transport.
    pub fn is_application(&self) -> bool {
        matches!(self, BackendError::Application(_))
    }
}

/// Transport settings attached to discovery and invocation requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub use_tls: bool,
    /// Resolved metadata, sent URI-encoded as `md`.
    pub metadata: String,
}

impl RequestContext {
    fn md_query(&self) -> String {
        format!("md={}", encode_uri(&self.metadata))
    }

    fn tls_header(&self) -> &'static str {
        if self.use_tls {
            "true"
        } else {
            "false"
        }
    }
}

/// A proto file uploaded in local-proto mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl ProtoFile {
    pub async fn read(path: &Path) -> Result<Self, BackendError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| BackendError::Proto(path.to_path_buf(), e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, content })
    }

    pub async fn read_all(paths: &[PathBuf]) -> Result<Vec<Self>, BackendError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(Self::read(path).await?);
        }
        Ok(files)
    }
}

/// Stage-one request: list the target's services.
#[derive(Debug, Clone)]
pub struct ServicesRequest {
    pub target: String,
    pub restart: bool,
    /// Local proto files; `Some` switches to a multipart POST.
    pub protos: Option<Vec<PathBuf>>,
    pub ctx: RequestContext,
}

/// Stage-two request: list a service's methods.
#[derive(Debug, Clone)]
pub struct MethodsRequest {
    pub target: String,
    pub service: String,
    pub ctx: RequestContext,
}

/// Stage-three request: describe a method.
#[derive(Debug, Clone)]
pub struct DescribeRequest {
    pub target: String,
    pub method: String,
    pub ctx: RequestContext,
}

/// Request template and schema of a method.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MethodDescriptor {
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub schema: String,
}

/// Which execution endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Invoke,
    LoadTest,
}

impl InvokeKind {
    fn path_segment(self) -> &'static str {
        match self {
            InvokeKind::Invoke => "invoke",
            InvokeKind::LoadTest => "loadtest",
        }
    }
}

impl std::fmt::Display for InvokeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeKind::Invoke => write!(f, "invoke"),
            InvokeKind::LoadTest => write!(f, "load test"),
        }
    }
}

/// An invoke or load-test request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub kind: InvokeKind,
    pub target: String,
    pub method: String,
    /// Sent verbatim.
    pub body: String,
    pub ctx: RequestContext,
}

/// Result of an invoke or load test. `timer` is opaque text from the
/// gateway (latency for invoke, a run summary cost for load tests).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvokeReply {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub timer: String,
}

#[derive(Debug, Deserialize)]
struct CloseReply {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// Client for the gateway's HTTP surface.
#[derive(Debug, Clone)]
pub struct Backend {
    http: reqwest::Client,
    base: String,
}

impl Backend {
    /// Build a client for the gateway at `base` (e.g. `http://127.0.0.1:6969/`).
    pub fn new(base: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base = base.trim();
        if reqwest::Url::parse(base).is_err() {
            return Err(BackendError::InvalidBaseUrl(base.to_string()));
        }
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Transport)?;
        Ok(Self { http, base })
    }

    /// Gateway base URL, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }

    /// `GET` (or multipart `POST` in local-proto mode) `server/{target}/services`.
    pub async fn list_services(&self, req: &ServicesRequest) -> Result<Vec<String>, BackendError> {
        let url = self.url(&format!(
            "server/{}/services?restart={}&{}",
            req.target,
            if req.restart { "1" } else { "0" },
            req.ctx.md_query()
        ));

        let builder = match req.protos {
            Some(ref paths) => {
                let mut form = reqwest::multipart::Form::new();
                for file in ProtoFile::read_all(paths).await? {
                    let part = reqwest::multipart::Part::bytes(file.content).file_name(file.name);
                    form = form.part(PROTOS_FIELD, part);
                }
                self.http.post(&url).multipart(form)
            }
            None => self.http.get(&url),
        };

        let data: Option<Vec<String>> = self
            .send(builder.header(USE_TLS_HEADER, req.ctx.tls_header()))
            .await?;
        Ok(data.unwrap_or_default())
    }

    /// `GET server/{target}/service/{service}/functions`.
    pub async fn list_methods(&self, req: &MethodsRequest) -> Result<Vec<String>, BackendError> {
        let url = self.url(&format!(
            "server/{}/service/{}/functions?{}",
            req.target,
            req.service,
            req.ctx.md_query()
        ));
        let data: Option<Vec<String>> = self
            .send(self.http.get(&url).header(USE_TLS_HEADER, req.ctx.tls_header()))
            .await?;
        Ok(data.unwrap_or_default())
    }

    /// `GET server/{target}/function/{method}/describe`.
    pub async fn describe(&self, req: &DescribeRequest) -> Result<MethodDescriptor, BackendError> {
        let url = self.url(&format!(
            "server/{}/function/{}/describe?{}",
            req.target,
            req.method,
            req.ctx.md_query()
        ));
        self.send(self.http.get(&url).header(USE_TLS_HEADER, req.ctx.tls_header()))
            .await
    }

    /// `POST server/{target}/function/{method}/{invoke|loadtest}` with the
    /// raw body.
    pub async fn invoke(&self, req: &InvokeRequest) -> Result<InvokeReply, BackendError> {
        let url = self.url(&format!(
            "server/{}/function/{}/{}?{}",
            req.target,
            req.method,
            req.kind.path_segment(),
            req.ctx.md_query()
        ));
        self.send(
            self.http
                .post(&url)
                .header(USE_TLS_HEADER, req.ctx.tls_header())
                .body(req.body.clone()),
        )
        .await
    }

    /// `GET active/get`.
    pub async fn active_connections(&self) -> Result<Vec<String>, BackendError> {
        let data: Option<Vec<String>> = self.send(self.http.get(self.url("active/get"))).await?;
        Ok(data.unwrap_or_default())
    }

    /// `DELETE active/close/{address}`. Returns the gateway's confirmation.
    pub async fn close_connection(&self, address: &str) -> Result<bool, BackendError> {
        let url = self.url(&format!("active/close/{address}"));
        let reply: Option<CloseReply> = self.send(self.http.delete(&url)).await?;
        Ok(reply.is_some_and(|r| r.success))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let resp = builder.send().await.map_err(|e| self.classify(e))?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| self.classify(e))?;
        decode_envelope(status, &bytes)
    }

    /// Turn a reqwest error into a human-friendly [`BackendError`].
    fn classify(&self, e: reqwest::Error) -> BackendError {
        if e.is_connect() {
            BackendError::Connect(self.base.clone())
        } else if e.is_timeout() {
            BackendError::Timeout(self.base.clone())
        } else {
            BackendError::Transport(e)
        }
    }
}

fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T, BackendError> {
    let envelope = serde_json::from_slice::<Envelope>(body);

    if !status.is_success() {
        let message = envelope
            .ok()
            .and_then(|e| e.error)
            .filter(|m| !m.is_empty());
        return Err(BackendError::Status { status, message });
    }

    let envelope = envelope.map_err(|e| BackendError::Decode(e.to_string()))?;
    if let Some(error) = envelope.error.filter(|m| !m.is_empty()) {
        return Err(BackendError::Application(error));
    }
    serde_json::from_value(envelope.data).map_err(|e| BackendError::Decode(e.to_string()))
}
