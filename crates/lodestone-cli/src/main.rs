//! # Lodestone entry point
//!
//! Starts the load balancer from a YAML configuration file:
//!
//! ```bash
//! lodestone --config config.yaml
//! lodestone --config config.yaml --log-level debug
//! ```
//!
//! The process serves traffic on every configured frontend port, exposes
//! metrics and the admin API on the metrics port (default 9090), and shuts
//! down cleanly on SIGINT/SIGTERM: listeners stop accepting, in-flight
//! requests drain, background tasks stop.

use anyhow::Result;
use argh::FromArgs;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lodestone_balancer::{admin_router, FrontendServer, HealthChecker, LoadBalancer, TlsManager};
use lodestone_common::config::Config;
use lodestone_common::shutdown::Shutdown;
use lodestone_metrics::Metrics;

/// HTTP/HTTPS load balancer with weighted round-robin, circuit breaking
/// and rate limiting.
#[derive(FromArgs)]
struct Cli {
    /// path to the YAML configuration file
    #[argh(option, short = 'c', default = "String::from(\"config.yaml\")")]
    config: String,

    /// log filter when RUST_LOG is unset (e.g. info, debug)
    #[argh(option, default = "String::from(\"info\")")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load(&cli.config)?;
    let metrics = Metrics::global();

    let tls = match &config.ssl {
        Some(ssl) => Some(Arc::new(TlsManager::new(ssl.clone())?)),
        None => None,
    };

    let balancer = Arc::new(LoadBalancer::new(config.clone(), metrics.clone())?);
    let shutdown = Arc::new(Shutdown::new());

    spawn_signal_handler(shutdown.clone());

    let health_checker = HealthChecker::new(balancer.clone(), metrics.clone());
    let _health_handle = health_checker.spawn(shutdown.handle());

    if config.metrics.enabled {
        spawn_ops_server(
            balancer.clone(),
            metrics.clone(),
            config.metrics.port,
            shutdown.as_ref(),
        );
    }

    let frontend = FrontendServer::new(balancer, tls);
    frontend.run(shutdown.handle()).await?;

    info!("shutdown complete");
    Ok(())
}

/// Translates SIGINT/SIGTERM into the shutdown signal.
fn spawn_signal_handler(shutdown: Arc<Shutdown>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(err) => {
                        error!("failed to install SIGTERM handler: {err}");
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received interrupt, shutting down");
        }

        shutdown.trigger();
    });
}

/// Serves the metrics exposition endpoint and the admin API on one port.
fn spawn_ops_server(
    balancer: Arc<LoadBalancer>,
    metrics: Arc<Metrics>,
    port: u16,
    shutdown: &Shutdown,
) {
    let metrics_route = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let metrics = metrics.clone();
            async move { metrics.render() }
        }),
    );
    let app = admin_router(balancer).merge(metrics_route);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let mut shutdown_handle = shutdown.handle();
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(%addr, "failed to bind metrics listener: {err}");
                return;
            }
        };
        info!(%addr, "metrics and admin API listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_handle.triggered().await;
            })
            .await;
        if let Err(err) = served {
            error!("metrics server error: {err}");
        }
    });
}
