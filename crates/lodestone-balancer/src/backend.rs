//! Backend records and the immutable backend set.

use reqwest::Url;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use lodestone_common::rate_limit::RateLimiter;

use crate::circuit_breaker::CircuitBreaker;
use crate::wrr::WeightedRoundRobin;

/// One upstream origin with its protection state.
///
/// Each backend exclusively owns its circuit breaker and rate limiter.
/// Counters are atomics so the record can be shared freely across request
/// handlers without locking.
#[derive(Debug)]
pub struct Backend {
    /// Stable identifier within the active set
    pub id: String,
    /// Parsed origin URL
    pub url: Url,
    weight: AtomicI64,
    healthy: AtomicBool,
    active_conns: AtomicI64,
    total_requests: AtomicU64,
    pub circuit_breaker: CircuitBreaker,
    /// Absent when rate limiting is disabled
    pub rate_limiter: Option<RateLimiter>,
}

impl Backend {
    pub fn new(
        id: impl Into<String>,
        url: Url,
        weight: i64,
        circuit_breaker: CircuitBreaker,
        rate_limiter: Option<RateLimiter>,
    ) -> Self {
        Self {
            id: id.into(),
            url,
            weight: AtomicI64::new(weight.max(1)),
            healthy: AtomicBool::new(true),
            active_conns: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            circuit_breaker,
            rate_limiter,
        }
    }

    pub fn weight(&self) -> i64 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: i64) {
        self.weight.store(weight.max(1), Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn begin_request(&self) {
        self.active_conns.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_request(&self) {
        self.active_conns.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_conns(&self) -> i64 {
        self.active_conns.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }
}

/// A shared reference to a backend.
pub type SharedBackend = Arc<Backend>;

/// One immutable generation of the active backend set.
///
/// The set owns the selector state for its members, so a handler that loaded
/// this generation selects only among these backends. Membership changes
/// build a whole new set and swap the pointer in the balancer.
#[derive(Debug)]
pub struct BackendSet {
    backends: Vec<SharedBackend>,
    by_id: HashMap<String, SharedBackend>,
    selector: WeightedRoundRobin,
}

impl BackendSet {
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
            by_id: HashMap::new(),
            selector: WeightedRoundRobin::new(),
        }
    }

    pub fn new(backends: Vec<SharedBackend>) -> Self {
        let selector = WeightedRoundRobin::new();
        let mut by_id = HashMap::with_capacity(backends.len());
        for backend in &backends {
            selector.add(backend.id.as_str(), backend.weight());
            by_id.insert(backend.id.clone(), backend.clone());
        }
        Self {
            backends,
            by_id,
            selector,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Selects the next backend by smooth weighted round-robin.
    pub fn next(&self) -> Option<SharedBackend> {
        let id = self.selector.next()?;
        self.by_id.get(&id).cloned()
    }

    pub fn get(&self, id: &str) -> Option<SharedBackend> {
        self.by_id.get(id).cloned()
    }

    pub fn backends(&self) -> &[SharedBackend] {
        &self.backends
    }

    pub fn selector(&self) -> &WeightedRoundRobin {
        &self.selector
    }

    pub fn urls(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.url.to_string()).collect()
    }
}
