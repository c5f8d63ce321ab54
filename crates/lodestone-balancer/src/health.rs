//! Background health probing of the active backend set.
//!
//! Health is a long-horizon signal: it feeds the health flag and the
//! `loadbalancer_backend_health` gauge but does not gate selection. The
//! circuit breaker remains the short-term protective gate.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use lodestone_common::config::HealthCheckConfig;
use lodestone_common::shutdown::ShutdownHandle;
use lodestone_metrics::Metrics;

use crate::backend::SharedBackend;
use crate::balancer::LoadBalancer;

/// Periodic health checker for the balancer's backends.
pub struct HealthChecker {
    balancer: Arc<LoadBalancer>,
    metrics: Arc<Metrics>,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(balancer: Arc<LoadBalancer>, metrics: Arc<Metrics>) -> Self {
        let config = balancer.config().healthcheck.clone();
        Self {
            balancer,
            metrics,
            config,
        }
    }

    /// Starts the probe loop. The task stops when the shutdown signal fires.
    pub fn spawn(self, shutdown: ShutdownHandle) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(self, mut shutdown: ShutdownHandle) {
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    info!("health checker stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    /// Probes every backend in the current set in parallel and applies the
    /// results.
    pub async fn check_all(&self) {
        let backends = self.balancer.current_backends();

        let probes = backends.iter().map(|backend| {
            let backend = backend.clone();
            async move {
                let healthy = self.probe(&backend).await;
                (backend, healthy)
            }
        });

        for (backend, healthy) in join_all(probes).await {
            self.apply(&backend, healthy);
        }
    }

    async fn probe(&self, backend: &SharedBackend) -> bool {
        let mut url = backend.url.clone();
        url.set_path(&self.config.path);
        url.set_query(None);

        let request = self.balancer.upstream_client().get(url).send();
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok(response)) => response.status().is_success(),
            // probe errors only flip the flag; they are otherwise silent
            _ => false,
        }
    }

    fn apply(&self, backend: &SharedBackend, healthy: bool) {
        let was_healthy = backend.is_healthy();
        if healthy != was_healthy {
            if healthy {
                info!(backend = %backend.url, "backend recovered");
            } else {
                warn!(backend = %backend.url, "backend unhealthy");
            }
            backend.set_healthy(healthy);
        }
        self.metrics.set_backend_health(backend.url.as_str(), healthy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_common::config::{Config, Frontend};
    use lodestone_common::shutdown::Shutdown;
    use std::time::Duration;

    fn test_balancer(backends: Vec<String>, healthcheck: HealthCheckConfig) -> Arc<LoadBalancer> {
        let config = Config {
            frontends: vec![Frontend { port: 8080 }],
            backends,
            healthcheck,
            ssl: None,
            ratelimit: Default::default(),
            circuitbreaker: Default::default(),
            metrics: Default::default(),
        };
        Arc::new(LoadBalancer::new(config, Arc::new(Metrics::new())).unwrap())
    }

    async fn spawn_origin(healthy: bool) -> std::net::SocketAddr {
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::Router;

        let status = if healthy { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
        let app = Router::new().route("/health", get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_probe_marks_healthy_origin() {
        let addr = spawn_origin(true).await;
        let balancer = test_balancer(
            vec![format!("http://{addr}")],
            HealthCheckConfig::default(),
        );
        let metrics = Arc::new(Metrics::new());
        let checker = HealthChecker::new(balancer.clone(), metrics.clone());

        checker.check_all().await;

        let backend = &balancer.current_backends()[0];
        assert!(backend.is_healthy());
        assert_eq!(
            metrics
                .backend_health
                .with_label_values(&[backend.url.as_str()])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_probe_flags_unhealthy_origin() {
        let addr = spawn_origin(false).await;
        let balancer = test_balancer(
            vec![format!("http://{addr}")],
            HealthCheckConfig::default(),
        );
        let metrics = Arc::new(Metrics::new());
        let checker = HealthChecker::new(balancer.clone(), metrics.clone());

        checker.check_all().await;

        let backend = &balancer.current_backends()[0];
        assert!(!backend.is_healthy());
        assert_eq!(
            metrics
                .backend_health
                .with_label_values(&[backend.url.as_str()])
                .get(),
            0.0
        );
    }

    #[tokio::test]
    async fn test_probe_treats_connect_failure_as_unhealthy() {
        // nothing listens on this port
        let balancer = test_balancer(
            vec!["http://127.0.0.1:1".to_string()],
            HealthCheckConfig {
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        let metrics = Arc::new(Metrics::new());
        let checker = HealthChecker::new(balancer.clone(), metrics);

        checker.check_all().await;
        assert!(!balancer.current_backends()[0].is_healthy());
    }

    #[tokio::test]
    async fn test_unhealthy_backend_stays_selectable() {
        let balancer = test_balancer(
            vec!["http://127.0.0.1:1".to_string()],
            HealthCheckConfig {
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        let checker = HealthChecker::new(balancer.clone(), Arc::new(Metrics::new()));
        checker.check_all().await;

        // health does not gate selection; the breaker is the gate
        assert!(balancer.select().is_some());
    }

    #[tokio::test]
    async fn test_checker_stops_on_shutdown() {
        let balancer = test_balancer(vec![], HealthCheckConfig::default());
        let checker = HealthChecker::new(balancer, Arc::new(Metrics::new()));

        let shutdown = Shutdown::new();
        let handle = checker.spawn(shutdown.handle());
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
