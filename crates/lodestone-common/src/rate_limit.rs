//! Rate limiting for backend admission.
//!
//! Two algorithms are provided, selected by configuration:
//!
//! - **Token bucket**: tokens regenerate at a fixed rate up to a cap, a
//!   request is admitted iff a whole token is available. Refill is lazy and
//!   real-valued, so long idle periods do not quantize away fractional
//!   tokens.
//! - **Sliding window**: a request is admitted iff the number of requests in
//!   the last `window` is below the limit. A background task evicts expired
//!   buckets periodically and is cancelled when the limiter is stopped.
//!
//! Each backend owns its limiter; admission serializes on a per-limiter lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{RateLimitAlgorithm, RateLimitSettings};
use crate::error::{ErrorKind, LbError, Result};

/// Configuration for the token bucket limiter.
///
/// Non-positive values fall back to the defaults: 100 tokens per second,
/// capacity equal to the rate.
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Tokens added per second
    pub rate: f64,
    /// Maximum number of stored tokens
    pub capacity: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            rate: 100.0,
            capacity: 100.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        let rate = if config.rate <= 0.0 { 100.0 } else { config.rate };
        let capacity = if config.capacity <= 0.0 { rate } else { config.capacity };
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Admits the request if a token is available, consuming it.
    pub fn allow(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, self.rate, self.capacity, Instant::now());

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            Err(LbError::new(ErrorKind::RateLimitExceeded, "rate limit exceeded"))
        }
    }

    /// Current token count after a lazy refill.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        Self::refill(&mut state, self.rate, self.capacity, Instant::now());
        state.tokens
    }

    fn refill(state: &mut BucketState, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.last_refill = now;
    }
}

/// Configuration for the sliding window limiter.
///
/// Non-positive values fall back to the defaults: 1 second window, 100
/// requests, cleanup every minute.
#[derive(Debug, Clone)]
pub struct SlidingWindowConfig {
    pub window: Duration,
    pub limit: u64,
    pub cleanup_interval: Duration,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            limit: 100,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Sliding window rate limiter.
///
/// Requests are bucketed by their nanosecond arrival offset; admission
/// counts only buckets inside the window. Must be created inside a Tokio
/// runtime, which hosts the cleanup task.
#[derive(Debug)]
pub struct SlidingWindow {
    window: Duration,
    limit: u64,
    epoch: Instant,
    requests: Arc<Mutex<HashMap<u128, u64>>>,
    cleanup_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SlidingWindow {
    pub fn new(config: SlidingWindowConfig) -> Self {
        let window = if config.window.is_zero() {
            Duration::from_secs(1)
        } else {
            config.window
        };
        let limit = if config.limit == 0 { 100 } else { config.limit };
        let cleanup_interval = if config.cleanup_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            config.cleanup_interval
        };

        let epoch = Instant::now();
        let requests: Arc<Mutex<HashMap<u128, u64>>> = Arc::new(Mutex::new(HashMap::new()));
        let cleanup_handle = tokio::spawn(cleanup_loop(
            requests.clone(),
            epoch,
            window,
            cleanup_interval,
        ));

        Self {
            window,
            limit,
            epoch,
            requests,
            cleanup_handle: Mutex::new(Some(cleanup_handle)),
        }
    }

    /// Admits the request if the window count is below the limit.
    pub fn allow(&self) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let now = self.epoch.elapsed().as_nanos();
        let window_start = now.saturating_sub(self.window.as_nanos());

        let count: u64 = requests
            .iter()
            .filter(|(stamp, _)| **stamp >= window_start)
            .map(|(_, reqs)| *reqs)
            .sum();

        if count >= self.limit {
            return Err(LbError::new(ErrorKind::RateLimitExceeded, "rate limit exceeded"));
        }

        *requests.entry(now).or_insert(0) += 1;
        Ok(())
    }

    /// Number of live buckets, including expired ones not yet cleaned up.
    pub fn bucket_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Cancels the cleanup task and drops all recorded requests.
    pub fn stop(&self) {
        if let Some(handle) = self.cleanup_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.requests.lock().unwrap().clear();
    }
}

impl Drop for SlidingWindow {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn cleanup_loop(
    requests: Arc<Mutex<HashMap<u128, u64>>>,
    epoch: Instant,
    window: Duration,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let threshold = epoch
            .elapsed()
            .checked_sub(window)
            .unwrap_or_default()
            .as_nanos();
        requests.lock().unwrap().retain(|stamp, _| *stamp >= threshold);
    }
}

/// Rate limiter variants, selected by configuration.
///
/// The pipeline is polymorphic over this one `allow` method; both variants
/// reject with `RateLimitExceeded`.
#[derive(Debug)]
pub enum RateLimiter {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
}

impl RateLimiter {
    /// Builds the configured limiter variant.
    ///
    /// The sustained `rate` maps to the bucket refill rate and to the
    /// per-second window limit; `burst` maps to the bucket capacity.
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        match settings.algorithm {
            RateLimitAlgorithm::TokenBucket => RateLimiter::TokenBucket(TokenBucket::new(TokenBucketConfig {
                rate: settings.rate,
                capacity: settings.burst,
            })),
            RateLimitAlgorithm::SlidingWindow => {
                RateLimiter::SlidingWindow(SlidingWindow::new(SlidingWindowConfig {
                    window: Duration::from_secs(1),
                    limit: if settings.rate <= 0.0 { 0 } else { settings.rate as u64 },
                    ..Default::default()
                }))
            }
        }
    }

    pub fn allow(&self) -> Result<()> {
        match self {
            RateLimiter::TokenBucket(bucket) => bucket.allow(),
            RateLimiter::SlidingWindow(window) => window.allow(),
        }
    }
}
