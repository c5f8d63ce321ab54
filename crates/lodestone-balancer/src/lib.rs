//! Lodestone Balancer
//!
//! The request data plane of the load balancer: weighted backend selection,
//! per-backend circuit breaking and rate limiting, reverse proxying with a
//! fixed upstream deadline, and the rolling reconfiguration protocol that
//! replaces the backend set while traffic is in flight.
//!
//! # Architecture
//!
//! The active backend set is a single immutable value behind an atomic
//! pointer. Request handlers load the pointer once and work against that
//! generation for the whole request; the reconfiguration path builds a new
//! set and swaps the pointer, so a request observes either the old set or
//! the new set, never a mixture. Removed backends drain naturally: the last
//! in-flight request holds the last reference.
//!
//! Per request the pipeline runs:
//!
//! 1. load the backend set (empty set → 503)
//! 2. smooth weighted round-robin selection
//! 3. circuit breaker admission (open circuit → 503)
//! 4. rate limiter admission (rejected → 429)
//! 5. reverse proxy to the origin with a 30 s deadline (elapsed → 504,
//!    other upstream failure → 502)
//!
//! Health probing runs beside the data plane and only feeds the health flag
//! and the `loadbalancer_backend_health` gauge; an unhealthy backend stays
//! selectable and the circuit breaker is the short-term protective gate.

pub mod admin;
pub mod backend;
pub mod balancer;
pub mod circuit_breaker;
pub mod health;
pub mod listener;
pub mod proxy;
pub mod rollout;
pub mod tls;
pub mod wrr;

pub use admin::admin_router;
pub use backend::{Backend, BackendSet, SharedBackend};
pub use balancer::LoadBalancer;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::HealthChecker;
pub use listener::FrontendServer;
pub use rollout::{RollbackConfig, RolloutConfig};
pub use tls::TlsManager;
pub use wrr::WeightedRoundRobin;
