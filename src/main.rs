use hostgate::admin::{AdminServer, PKG_NAME, VERSION};
use hostgate::config::Config;
use hostgate::proxy::{Gateway, ProxyServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hostgate=info".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let gateway = Arc::new(Gateway::from_config(&config)?);
    let stats = gateway.stats();

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    // Bind before spawning so a taken port aborts startup
    let listener = tokio::net::TcpListener::bind(proxy_addr).await?;
    let proxy = ProxyServer::new(proxy_addr, gateway, shutdown_rx.clone());
    let proxy_handle = tokio::spawn(async move {
        if let Err(e) = proxy.serve(listener).await {
            error!(error = %e, "Gateway server error");
        }
    });

    let metrics_handle = if config.server.metrics_port > 0 {
        let metrics_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.metrics_port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid metrics bind address: {}", e))?;
        let admin = AdminServer::new(metrics_addr, stats, shutdown_rx.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = admin.run().await {
                error!(error = %e, "Metrics server error");
            }
        }))
    } else {
        None
    };

    wait_for_shutdown_signal().await;

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for servers to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = proxy_handle.await;
        if let Some(handle) = metrics_handle {
            let _ = handle.await;
        }
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C), shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        metrics_port = if config.server.metrics_port > 0 { Some(config.server.metrics_port) } else { None },
        routing_domain = %config.server.routing_domain,
        request_timeout_secs = config.server.request_timeout_secs,
        "Server configuration"
    );
    info!(
        pool_max_idle = config.server.pool_max_idle_per_host,
        pool_idle_timeout_secs = config.server.pool_idle_timeout_secs,
        "Connection pool settings"
    );
    info!(
        login_url = %config.auth.login_url,
        allowed_domains = ?config.auth.allowed_domains,
        cookie_name = %config.auth.cookie_name,
        "Authentication settings"
    );
}
