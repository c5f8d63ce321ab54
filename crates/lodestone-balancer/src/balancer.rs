//! The load balancer core: active backend set and request pipeline.

use arc_swap::ArcSwap;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

use lodestone_common::config::Config;
use lodestone_common::error::{ErrorKind, LbError, Result};
use lodestone_common::rate_limit::RateLimiter;
use lodestone_metrics::Metrics;

use crate::backend::{Backend, BackendSet, SharedBackend};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::proxy::{self, ProxyResponse};

/// Backend state reported by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub url: String,
    pub weight: i64,
    pub healthy: bool,
    pub active_conns: i64,
    pub total_requests: u64,
    pub circuit_state: String,
}

/// HTTP/HTTPS load balancer.
///
/// Shared by every request handler behind an `Arc`. The active backend set
/// is published through an atomic pointer; the reconfiguration entry points
/// (install, add, remove, rollout) are the single writer, serialized by
/// `reconfig_lock`.
#[derive(Debug)]
pub struct LoadBalancer {
    config: Config,
    metrics: Arc<Metrics>,
    backends: ArcSwap<BackendSet>,
    client: reqwest::Client,
    pub(crate) reconfig_lock: Mutex<()>,
    upstream_timeout: Duration,
}

impl LoadBalancer {
    /// Builds a balancer and installs the configured backend list.
    pub fn new(config: Config, metrics: Arc<Metrics>) -> Result<Self> {
        // a reverse proxy passes redirects through instead of following them
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| LbError::wrap(ErrorKind::ConfigInvalid, "failed to build upstream client", e))?;

        let lb = Self {
            metrics,
            client,
            backends: ArcSwap::from_pointee(BackendSet::empty()),
            reconfig_lock: Mutex::new(()),
            upstream_timeout: proxy::UPSTREAM_TIMEOUT,
            config,
        };

        let initial = lb.config.backends.clone();
        if !initial.is_empty() {
            lb.install(&initial)?;
        }
        info!(backends = lb.backend_count(), "load balancer initialized");
        Ok(lb)
    }

    /// Overrides the fixed upstream deadline. Tests exercise timeout
    /// classification through this without waiting out the default.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub(crate) fn upstream_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Replaces the entire active backend set.
    ///
    /// Every URL must parse and every record must construct before the new
    /// set is swapped in, so concurrent requests observe either the old set
    /// completely or the new set completely. Installing the current list is
    /// a no-op. New records start at nominal weight 1.
    pub fn install(&self, urls: &[String]) -> Result<()> {
        let parsed = urls
            .iter()
            .map(|raw| parse_origin_url(raw))
            .collect::<Result<Vec<_>>>()?;

        let current = self.backends.load();
        if parsed.len() == current.len()
            && parsed
                .iter()
                .zip(current.backends())
                .all(|(url, backend)| *url == backend.url)
        {
            return Ok(());
        }

        let records: Vec<SharedBackend> = parsed
            .into_iter()
            .enumerate()
            .map(|(i, url)| Arc::new(self.build_backend(format!("backend-{i}"), url, 1)))
            .collect();

        let old = self.backends.swap(Arc::new(BackendSet::new(records)));
        self.prune_health_series(&old);
        info!(backends = self.backend_count(), "backend set installed");
        Ok(())
    }

    fn build_backend(&self, id: String, url: reqwest::Url, weight: i64) -> Backend {
        let settings = &self.config.circuitbreaker;
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: settings.threshold,
            timeout: settings.timeout,
            half_open_max: settings.max_half_open,
        });
        let limiter = if self.config.ratelimit.enabled {
            Some(RateLimiter::from_settings(&self.config.ratelimit))
        } else {
            None
        };
        Backend::new(id, url, weight, breaker, limiter)
    }

    /// Drops health gauge series for backends that left the active set.
    fn prune_health_series(&self, old: &BackendSet) {
        let live = self.backends.load();
        for backend in old.backends() {
            if live.backends().iter().all(|b| b.url != backend.url) {
                self.metrics.remove_backend_health(backend.url.as_str());
            }
        }
    }

    /// Selects the next backend from the current set.
    pub fn select(&self) -> Option<SharedBackend> {
        self.backends.load().next()
    }

    /// Snapshot of the current backend records.
    pub fn current_backends(&self) -> Vec<SharedBackend> {
        self.backends.load().backends().to_vec()
    }

    pub fn backend_urls(&self) -> Vec<String> {
        self.backends.load().urls()
    }

    pub fn backend_count(&self) -> usize {
        self.backends.load().len()
    }

    /// Handles one client request through the full pipeline.
    pub async fn handle<B>(&self, req: Request<B>) -> ProxyResponse
    where
        B: Body<Data = Bytes> + Send,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let set = self.backends.load_full();
        if set.is_empty() {
            self.metrics.errors_total.inc();
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "No available backends");
        }

        let Some(backend) = set.next() else {
            self.metrics.errors_total.inc();
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "No available backends");
        };

        backend.begin_request();
        self.metrics.active_connections.inc();
        self.metrics.requests_total.inc();
        let start = Instant::now();

        let result = backend
            .circuit_breaker
            .execute(|| {
                let backend = backend.clone();
                let client = self.client.clone();
                let timeout = self.upstream_timeout;
                async move {
                    if let Some(limiter) = &backend.rate_limiter {
                        limiter.allow()?;
                    }
                    proxy::forward(&client, &backend, req, timeout).await
                }
            })
            .await;

        self.metrics.active_connections.dec();
        backend.end_request();

        match result {
            Ok(response) => {
                self.metrics
                    .response_time
                    .observe(start.elapsed().as_secs_f64());
                response
            }
            Err(err) => {
                self.metrics.errors_total.inc();
                warn!(backend = %backend.url, kind = err.kind().as_str(), "request failed: {err}");
                error_response(status_for(err.kind()), status_message(err.kind()))
            }
        }
    }

    // Admin entry points. HTTP bindings live in `admin`; these are the
    // in-process operations they delegate to.

    /// Adds one backend to the active set. Duplicate URLs are a no-op.
    pub async fn add_backend(&self, url: &str) -> Result<()> {
        let _guard = self.reconfig_lock.lock().await;
        let url = parse_origin_url(url)?;

        let current = self.backends.load();
        if current.backends().iter().any(|b| b.url == url) {
            return Ok(());
        }

        let mut records = current.backends().to_vec();
        let id = next_backend_id(&records);
        records.push(Arc::new(self.build_backend(id.clone(), url, 1)));
        self.backends.store(Arc::new(BackendSet::new(records)));
        info!(%id, "backend added");
        Ok(())
    }

    /// Removes a backend by id. Returns false when the id is unknown.
    pub async fn remove_backend(&self, id: &str) -> bool {
        let _guard = self.reconfig_lock.lock().await;

        let current = self.backends.load();
        let records: Vec<SharedBackend> = current
            .backends()
            .iter()
            .filter(|b| b.id != id)
            .cloned()
            .collect();
        if records.len() == current.len() {
            return false;
        }

        let old = self.backends.swap(Arc::new(BackendSet::new(records)));
        self.prune_health_series(&old);
        info!(%id, "backend removed");
        true
    }

    /// Updates a backend's nominal weight. Returns false when unknown.
    pub async fn update_backend_weight(&self, id: &str, weight: i64) -> bool {
        let _guard = self.reconfig_lock.lock().await;

        let current = self.backends.load();
        let Some(backend) = current.get(id) else {
            return false;
        };
        backend.set_weight(weight);
        current.selector().update_weight(id, weight)
    }

    /// Replaces the active set with the given URL list.
    pub async fn apply_backends(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Err(LbError::new(ErrorKind::ConfigInvalid, "backend list is empty"));
        }
        let _guard = self.reconfig_lock.lock().await;
        self.install(urls)
    }

    /// Status view of every backend in the active set.
    pub fn backends_snapshot(&self) -> Vec<BackendStatus> {
        self.backends
            .load()
            .backends()
            .iter()
            .map(|b| BackendStatus {
                id: b.id.clone(),
                url: b.url.to_string(),
                weight: b.weight(),
                healthy: b.is_healthy(),
                active_conns: b.active_conns(),
                total_requests: b.total_requests(),
                circuit_state: b.circuit_breaker.state().to_string(),
            })
            .collect()
    }
}

/// Parses and validates an origin URL.
pub(crate) fn parse_origin_url(raw: &str) -> Result<reqwest::Url> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| LbError::wrap(ErrorKind::ConfigInvalid, format!("invalid backend URL {raw}"), e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(LbError::new(
            ErrorKind::ConfigInvalid,
            format!("invalid backend URL {raw}: scheme must be http or https"),
        ));
    }
    if url.host_str().is_none() {
        return Err(LbError::new(
            ErrorKind::ConfigInvalid,
            format!("invalid backend URL {raw}: missing host"),
        ));
    }
    Ok(url)
}

fn next_backend_id(backends: &[SharedBackend]) -> String {
    let next = backends
        .iter()
        .filter_map(|b| b.id.strip_prefix("backend-"))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .map(|max| max + 1)
        .unwrap_or(0);
    format!("backend-{next}")
}

/// Maps an error kind to the client-facing status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::CircuitOpen | ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn status_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::CircuitOpen | ErrorKind::BackendUnavailable => "Service temporarily unavailable",
        ErrorKind::RateLimitExceeded => "Too many requests",
        ErrorKind::Timeout => "Gateway timeout",
        _ => "Backend error",
    }
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> ProxyResponse {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}
