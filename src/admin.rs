use crate::stats::GatewayStats;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Version information for the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Health, version and metrics endpoints on the metrics port
pub struct AdminServer {
    bind_addr: SocketAddr,
    stats: Arc<GatewayStats>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AdminServer {
    pub fn new(bind_addr: SocketAddr, stats: Arc<GatewayStats>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            bind_addr,
            stats,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "Metrics server listening");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let stats = Arc::clone(&self.stats);
                            tokio::spawn(async move {
                                if let Err(e) = serve_admin_connection(stream, stats).await {
                                    debug!(addr = %addr, error = %e, "Metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept metrics connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Metrics server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_admin_connection(stream: TcpStream, stats: Arc<GatewayStats>) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let stats = Arc::clone(&stats);
        async move { Ok::<_, Infallible>(handle_admin_request(req, &stats)) }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Metrics connection error: {}", e))?;

    Ok(())
}

fn handle_admin_request<B>(req: Request<B>, stats: &GatewayStats) -> Response<Full<Bytes>> {
    debug!(method = %req.method(), path = %req.uri().path(), "Metrics API request");

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => response(StatusCode::OK, "ok"),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        (&Method::GET, "/metrics") => match serde_json::to_string(&stats.snapshot()) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => {
                error!(error = %e, "Failed to serialize stats");
                response(StatusCode::INTERNAL_SERVER_ERROR, "stats unavailable")
            }
        },

        _ => response(StatusCode::NOT_FOUND, "not found"),
    }
}
