//! Frontend listeners: one accept loop per configured port.
//!
//! Each listener serves HTTP/1.1 connections through the balancer pipeline;
//! TLS listeners wrap the accepted stream first, handshaking with the TLS
//! manager's current config so certificate reloads only affect new
//! connections. On shutdown a listener stops accepting, drains in-flight
//! connections up to a deadline, then abandons the rest.

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use lodestone_common::error::{ErrorKind, LbError, Result};
use lodestone_common::shutdown::ShutdownHandle;

use crate::balancer::LoadBalancer;
use crate::tls::TlsManager;

const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// The set of frontend listeners.
pub struct FrontendServer {
    balancer: Arc<LoadBalancer>,
    tls: Option<Arc<TlsManager>>,
    drain_deadline: Duration,
}

impl FrontendServer {
    pub fn new(balancer: Arc<LoadBalancer>, tls: Option<Arc<TlsManager>>) -> Self {
        Self {
            balancer,
            tls,
            drain_deadline: DRAIN_DEADLINE,
        }
    }

    /// Shortens the shutdown drain deadline.
    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    /// Runs every configured listener until shutdown.
    ///
    /// Waits for all listeners to stop and reports the first error; a clean
    /// shutdown is success.
    pub async fn run(&self, shutdown: ShutdownHandle) -> Result<()> {
        let mut listeners = JoinSet::new();
        for frontend in &self.balancer.config().frontends {
            let addr = SocketAddr::from(([0, 0, 0, 0], frontend.port));
            listeners.spawn(listen(
                self.balancer.clone(),
                self.tls.clone(),
                addr,
                shutdown.clone(),
                self.drain_deadline,
            ));
        }

        let mut first_error = None;
        while let Some(joined) = listeners.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(LbError::wrap(ErrorKind::ConfigInvalid, "listener task failed", e))
            });
            if let Err(err) = outcome {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn listen(
    balancer: Arc<LoadBalancer>,
    tls: Option<Arc<TlsManager>>,
    addr: SocketAddr,
    mut shutdown: ShutdownHandle,
    drain_deadline: Duration,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        LbError::wrap(ErrorKind::ConfigInvalid, format!("failed to bind frontend {addr}"), e)
    })?;
    info!(%addr, tls = tls.is_some(), "frontend listening");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%addr, "accept failed: {err}");
                        continue;
                    }
                };
                let balancer = balancer.clone();
                let tls = tls.clone();
                connections.spawn(async move {
                    if let Err(err) = serve_connection(balancer, tls, stream).await {
                        // routine on client disconnects
                        debug!(%peer, "connection ended with error: {err}");
                    }
                });
            }
        }
    }

    drop(listener);
    info!(%addr, in_flight = connections.len(), "frontend draining");

    let drained = tokio::time::timeout(drain_deadline, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(%addr, "drain deadline elapsed, abandoning remaining connections");
        connections.abort_all();
    }

    info!(%addr, "frontend stopped");
    Ok(())
}

async fn serve_connection(
    balancer: Arc<LoadBalancer>,
    tls: Option<Arc<TlsManager>>,
    stream: TcpStream,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = service_fn(move |req| {
        let balancer = balancer.clone();
        async move { Ok::<_, std::convert::Infallible>(balancer.handle(req).await) }
    });

    match tls {
        Some(manager) => {
            let acceptor = TlsAcceptor::from(manager.current());
            let stream = acceptor.accept(stream).await?;
            http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await?;
        }
        None => {
            http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await?;
        }
    }
    Ok(())
}
