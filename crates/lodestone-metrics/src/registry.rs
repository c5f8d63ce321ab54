// Copyright 2025 Lodestone Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use prometheus::{
    Counter, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::{Arc, OnceLock, RwLock};

/// Metrics registry for the load balancer.
///
/// Each instance owns its own `prometheus::Registry`, so tests can build
/// isolated instances while production code shares the process-wide one
/// returned by [`Metrics::global`].
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    pub requests_total: Counter,
    pub errors_total: Counter,
    pub response_time: Histogram,
    pub active_connections: Gauge,
    pub backend_health: GaugeVec,
}

impl Metrics {
    /// Creates a new registry with all signals registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = Counter::with_opts(Opts::new(
            "loadbalancer_requests_total",
            "The total number of processed requests",
        ))
        .unwrap();
        registry.register(Box::new(requests_total.clone())).unwrap();

        let errors_total = Counter::with_opts(Opts::new(
            "loadbalancer_errors_total",
            "The total number of errors encountered",
        ))
        .unwrap();
        registry.register(Box::new(errors_total.clone())).unwrap();

        // Default buckets cover the usual HTTP latency range
        let response_time = Histogram::with_opts(HistogramOpts::new(
            "loadbalancer_response_time_seconds",
            "Response time distribution",
        ))
        .unwrap();
        registry.register(Box::new(response_time.clone())).unwrap();

        let active_connections = Gauge::with_opts(Opts::new(
            "loadbalancer_active_connections",
            "The current number of active connections",
        ))
        .unwrap();
        registry
            .register(Box::new(active_connections.clone()))
            .unwrap();

        let backend_health = GaugeVec::new(
            Opts::new(
                "loadbalancer_backend_health",
                "Health status of backends (1 for healthy, 0 for unhealthy)",
            ),
            &["backend_url"],
        )
        .unwrap();
        registry.register(Box::new(backend_health.clone())).unwrap();

        Self {
            registry,
            requests_total,
            errors_total,
            response_time,
            active_connections,
            backend_health,
        }
    }

    /// Returns the process-wide metrics instance.
    pub fn global() -> Arc<Metrics> {
        global_cell().read().unwrap().clone()
    }

    /// Replaces the process-wide instance with a freshly built one.
    ///
    /// Intended for tests that need a clean registry. Live pipelines keep
    /// updating the `Arc` they already hold; anything observed after the
    /// reset must re-fetch via [`Metrics::global`].
    pub fn reset() {
        let mut guard = global_cell().write().unwrap();
        *guard = Arc::new(Metrics::new());
    }

    /// Sets the labeled health gauge for one backend.
    pub fn set_backend_health(&self, backend_url: &str, healthy: bool) {
        self.backend_health
            .with_label_values(&[backend_url])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    /// Drops the health series of a backend that left the active set.
    pub fn remove_backend_health(&self, backend_url: &str) {
        let _ = self.backend_health.remove_label_values(&[backend_url]);
    }

    /// Renders the registry in the text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn global_cell() -> &'static RwLock<Arc<Metrics>> {
    static GLOBAL: OnceLock<RwLock<Arc<Metrics>>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Arc::new(Metrics::new())))
}
