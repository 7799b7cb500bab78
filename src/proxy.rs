use crate::auth::{AccessDecision, AccessGate, CallerIdentity, SessionAuthenticator};
use crate::config::Config;
use crate::dispatch::{DispatchError, Dispatcher, ForwardContext, PoolConfig, ProxyResult};
use crate::error::{json_error_response, login_redirect_response, ProxyBody, ProxyErrorCode};
use crate::headers::X_REQUEST_ID;
use crate::host::{extract_hostname, HostMatcher};
use crate::stats::GatewayStats;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message for every routing failure, whatever the cause
const NOT_FOUND_MESSAGE: &str = "Not found";

/// Per-request pipeline: access gate, host matcher, dispatcher.
///
/// Holds only read-only configuration and aggregate counters, so one
/// instance serves all connections concurrently.
pub struct Gateway {
    gate: AccessGate,
    matcher: HostMatcher,
    dispatcher: Dispatcher,
    stats: Arc<GatewayStats>,
    request_timeout: Option<Duration>,
}

impl Gateway {
    pub fn new(
        gate: AccessGate,
        matcher: HostMatcher,
        dispatcher: Dispatcher,
        stats: Arc<GatewayStats>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            gate,
            matcher,
            dispatcher,
            stats,
            request_timeout,
        }
    }

    /// Build a gateway with session authentication from validated configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let matcher = HostMatcher::new(&config.server.routing_domain)
            .map_err(|e| anyhow::anyhow!("Invalid routing domain: {}", e))?;
        debug!(routing_domain = matcher.routing_domain(), "Host matcher ready");
        let authenticator = Arc::new(SessionAuthenticator::new(config.auth.clone()));
        let dispatcher = Dispatcher::new(PoolConfig {
            max_idle_per_host: config.server.pool_max_idle_per_host,
            idle_timeout: config.server.pool_idle_timeout(),
        });

        Ok(Self::new(
            AccessGate::new(authenticator),
            matcher,
            dispatcher,
            Arc::new(GatewayStats::new()),
            config.server.request_timeout(),
        ))
    }

    pub fn stats(&self) -> Arc<GatewayStats> {
        Arc::clone(&self.stats)
    }

    /// Handle one request. Every failure becomes a response here.
    pub async fn handle(&self, req: Request<Incoming>, client_addr: SocketAddr) -> Response<ProxyBody> {
        self.stats.record_request();

        // Generate or propagate request ID
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut response = self.route(req, client_addr, &request_id).await;

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        response
    }

    async fn route(&self, req: Request<Incoming>, client_addr: SocketAddr, request_id: &str) -> Response<ProxyBody> {
        // Authentication comes before looking at the host so anonymous
        // callers learn nothing about which routes exist
        let identity = match self.gate.check(req.headers(), req.uri()) {
            AccessDecision::Proceed(identity) => identity,
            AccessDecision::RedirectToLogin(location) => {
                self.stats.record_redirect();
                debug!(request_id, uri = %req.uri(), "Anonymous request redirected to login");
                return login_redirect_response(&location);
            }
            AccessDecision::Deny(reason) => {
                self.stats.record_denied();
                warn!(request_id, %client_addr, reason, "Access denied");
                return json_error_response(ProxyErrorCode::AuthDenied, format!("Access denied: {}", reason));
            }
        };
        let caller = match &identity {
            CallerIdentity::Authenticated { email, .. } => email.as_str(),
            CallerIdentity::Anonymous => "",
        };

        let Some(hostname) = extract_hostname(req.headers(), req.uri()) else {
            self.stats.record(&ProxyResult::NotFound, None);
            debug!(request_id, caller, "Missing or invalid Host header");
            return json_error_response(ProxyErrorCode::RouteNotFound, NOT_FOUND_MESSAGE);
        };

        let addr = match self.matcher.match_host(&hostname) {
            Ok(addr) => addr,
            Err(e) => {
                self.stats.record(&ProxyResult::NotFound, None);
                debug!(request_id, caller, hostname, reason = %e, "No route for host");
                return json_error_response(ProxyErrorCode::RouteNotFound, NOT_FOUND_MESSAGE);
            }
        };
        let target = addr.to_string();

        debug!(request_id, caller, hostname, target, method = %req.method(), uri = %req.uri(), "Forwarding request");

        let ctx = ForwardContext {
            client_addr,
            request_id: request_id.to_string(),
            timeout: self.request_timeout,
        };
        let result = {
            let _in_flight = self.stats.track_in_flight();
            self.dispatcher.forward(req, &addr, &ctx).await
        };
        let outcome = ProxyResult::from_dispatch(&result);
        self.stats.record(&outcome, Some(&target));

        match result {
            Ok(response) => {
                info!(request_id, caller, hostname, target, status = response.status().as_u16(), "Request forwarded");
                response
            }
            Err(DispatchError::BadTarget(reason)) => {
                debug!(request_id, caller, hostname, target, reason, "Rejected backend target");
                json_error_response(ProxyErrorCode::RouteNotFound, NOT_FOUND_MESSAGE)
            }
            Err(e @ DispatchError::Timeout { .. }) => {
                warn!(request_id, caller, hostname, target, error = %e, "Request timed out");
                json_error_response(ProxyErrorCode::RequestTimeout, "Backend did not respond in time")
            }
            Err(e @ DispatchError::Upstream { .. }) => {
                // Log detailed error internally, return generic message externally
                error!(request_id, caller, hostname, target, error = %e, "Failed to forward request");
                json_error_response(ProxyErrorCode::UpstreamUnavailable, "Failed to connect to backend")
            }
        }
    }
}

/// Binds a [`Gateway`] to a listening socket
pub struct ProxyServer {
    bind_addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    pub fn new(bind_addr: SocketAddr, gateway: Arc<Gateway>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            bind_addr,
            gateway,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Gateway listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gateway = Arc::clone(&self.gateway);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, gateway).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(stream: S, addr: SocketAddr, gateway: Arc<Gateway>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let gateway = Arc::clone(&gateway);
        async move { Ok::<_, Infallible>(gateway.handle(req, addr).await) }
    });

    // Serve both HTTP/1.1 and h2c on the same port
    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}
