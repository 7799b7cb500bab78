//! Forwarding requests to the backend named by the hostname
//!
//! Requests and responses are streamed through without buffering. Backend
//! connections are reused through the HTTP client's per-authority pool, so
//! concurrent requests to the same backend each get their own connection.

use crate::error::ProxyBody;
use crate::headers::{
    forwarded_proto, strip_hop_by_hop, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO,
    X_REQUEST_ID,
};
use crate::host::BackendAddress;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Address can't be turned into a backend URL
    #[error("bad target: {0}")]
    BadTarget(String),
    /// Connection, DNS or protocol failure talking to the backend
    #[error("upstream {target} unavailable: {source}")]
    Upstream {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
    /// No response headers within the configured timeout
    #[error("upstream {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
}

/// What happened to a request, for logging and stats
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyResult {
    Forwarded(StatusCode),
    NotFound,
    UpstreamError(String),
}

impl ProxyResult {
    pub fn from_dispatch(result: &Result<Response<ProxyBody>, DispatchError>) -> Self {
        match result {
            Ok(response) => ProxyResult::Forwarded(response.status()),
            Err(DispatchError::BadTarget(_)) => ProxyResult::NotFound,
            Err(e) => ProxyResult::UpstreamError(e.to_string()),
        }
    }
}

/// Configuration for the backend connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per backend
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Per-request values the dispatcher stamps onto the forwarded request
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub client_addr: SocketAddr,
    pub request_id: String,
    /// Maximum wait for response headers; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// Build `http://<service>:<port><path_and_query>`, rejecting unusable addresses
/// before anything touches the network.
pub fn target_uri(addr: &BackendAddress, path_and_query: &str) -> Result<Uri, DispatchError> {
    if addr.service.is_empty() {
        return Err(DispatchError::BadTarget("empty service name".to_string()));
    }
    if addr.port == 0 {
        return Err(DispatchError::BadTarget(format!("port 0 for service {}", addr.service)));
    }
    if !addr
        .service
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(DispatchError::BadTarget(format!("invalid service name {}", addr.service)));
    }

    let path = if path_and_query.starts_with('/') { path_and_query } else { "/" };
    format!("http://{}:{}{}", addr.service, addr.port, path)
        .parse::<Uri>()
        .map_err(|e| DispatchError::BadTarget(e.to_string()))
}

/// Relays requests to backends over a shared, pooled HTTP client
pub struct Dispatcher {
    client: Client<HttpConnector, Incoming>,
    config: PoolConfig,
}

impl Dispatcher {
    pub fn new(config: PoolConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Backend connection pool initialized"
        );

        Self {
            client,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Forward `req` to `addr` and hand back the backend's response.
    ///
    /// Never retries. Dropping the returned future (client went away) drops
    /// the backend request with it.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        addr: &BackendAddress,
        ctx: &ForwardContext,
    ) -> Result<Response<ProxyBody>, DispatchError> {
        let path = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let uri = target_uri(addr, path)?;

        let (mut parts, body) = req.into_parts();

        // HTTP/2 callers send :authority instead of Host
        if !parts.headers.contains_key(HOST) {
            if let Some(value) = parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                parts.headers.insert(HOST, value);
            }
        }

        strip_hop_by_hop(&mut parts.headers);
        set_forwarding_headers(&mut parts.headers, ctx);

        parts.uri = uri;
        parts.version = Version::HTTP_11;
        let backend_req = Request::from_parts(parts, body);

        let target = addr.to_string();
        let pending = self.client.request(backend_req);

        let response = match ctx.timeout {
            Some(timeout) => tokio::time::timeout(timeout, pending)
                .await
                .map_err(|_| DispatchError::Timeout {
                    target: target.clone(),
                    timeout,
                })?,
            None => pending.await,
        }
        .map_err(|source| DispatchError::Upstream { target, source })?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        Ok(Response::from_parts(parts, body.boxed()))
    }
}

/// Overwrite forwarding headers. The gateway is the first trusted hop, so
/// client-supplied X-Forwarded-For/-Host values are replaced, not appended to.
///
/// X-Forwarded-Proto is the exception: the gateway speaks plain HTTP behind a
/// TLS terminator, and only that terminator knows the original scheme. It
/// must set (or overwrite) the header; the value is normalized to
/// `http`/`https` here and otherwise passed through.
fn set_forwarding_headers(headers: &mut HeaderMap, ctx: &ForwardContext) {
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&ctx.client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = headers.get(HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let proto = forwarded_proto(headers);
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
}
