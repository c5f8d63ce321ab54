//! Per-backend circuit breaker.
//!
//! Three states guard a failing origin:
//!
//! - **Closed**: requests flow; `threshold` consecutive failures trip the
//!   circuit.
//! - **Open**: requests fail fast. Once `timeout` has elapsed since the last
//!   failure, the first admitted request moves the circuit to half-open.
//! - **HalfOpen**: probes flow; `half_open_max` consecutive successes close
//!   the circuit, any failure reopens it immediately.
//!
//! Success/failure recording is totally ordered by the state lock, so
//! transitions are serializable per backend. Concurrent half-open admissions
//! are allowed; correctness depends only on the recorded result stream.

use std::fmt;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use lodestone_common::error::{ErrorKind, LbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning. Non-positive values fall back to the defaults:
/// threshold 5, timeout 10 s, half-open max 3.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub threshold: u32,
    pub timeout: Duration,
    pub half_open_max: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(10),
            half_open_max: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    success_count: u32,
}

/// Circuit breaker state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    half_open_max: u32,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            threshold: if config.threshold == 0 { defaults.threshold } else { config.threshold },
            timeout: if config.timeout.is_zero() { defaults.timeout } else { config.timeout },
            half_open_max: if config.half_open_max == 0 {
                defaults.half_open_max
            } else {
                config.half_open_max
            },
            state: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                success_count: 0,
            }),
        }
    }

    /// Runs an operation under the breaker.
    ///
    /// Denied admission returns `CircuitOpen` without running the operation;
    /// otherwise the operation's outcome is recorded and returned as is.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.allow_request() {
            return Err(LbError::new(ErrorKind::CircuitOpen, "circuit breaker is open"));
        }

        let result = operation().await;
        self.record_result(result.is_err());
        result
    }

    /// Admission test.
    ///
    /// Closed and half-open admit. Open admits only once the timeout has
    /// elapsed since the last failure; the first such admission transitions
    /// to half-open with the success counter reset.
    pub fn allow_request(&self) -> bool {
        {
            let state = self.state.read().unwrap();
            match state.state {
                CircuitState::Closed | CircuitState::HalfOpen => return true,
                CircuitState::Open => {
                    let expired = state
                        .last_failure
                        .map(|at| at.elapsed() >= self.timeout)
                        .unwrap_or(true);
                    if !expired {
                        return false;
                    }
                }
            }
        }

        // Re-check under the write lock; only one admission performs the
        // Open -> HalfOpen transition.
        let mut state = self.state.write().unwrap();
        if state.state == CircuitState::Open {
            let expired = state
                .last_failure
                .map(|at| at.elapsed() >= self.timeout)
                .unwrap_or(true);
            if !expired {
                return false;
            }
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
        }
        true
    }

    /// Records one operation outcome.
    pub fn record_result(&self, failed: bool) {
        let mut state = self.state.write().unwrap();
        if failed {
            state.failures += 1;
            state.last_failure = Some(Instant::now());

            match state.state {
                CircuitState::Closed if state.failures >= self.threshold => {
                    state.state = CircuitState::Open;
                }
                CircuitState::HalfOpen => {
                    state.state = CircuitState::Open;
                }
                _ => {}
            }
        } else {
            match state.state {
                CircuitState::HalfOpen => {
                    state.success_count += 1;
                    if state.success_count >= self.half_open_max {
                        state.state = CircuitState::Closed;
                        state.failures = 0;
                    }
                }
                CircuitState::Closed => {
                    state.failures = 0;
                }
                CircuitState::Open => {}
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.read().unwrap().state
    }

    pub fn failures(&self) -> u32 {
        self.state.read().unwrap().failures
    }

    /// Forces the breaker back to closed with all counters zeroed.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.state = CircuitState::Closed;
        state.failures = 0;
        state.success_count = 0;
        state.last_failure = None;
    }
}
