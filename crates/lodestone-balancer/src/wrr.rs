//! Smooth weighted round-robin selection.
//!
//! Every `next()` adds each backend's effective weight to its current-weight
//! accumulator, picks the backend with the largest accumulator, and subtracts
//! the total effective weight from the winner. With weights (5, 3, 2) the
//! schedule spreads picks evenly instead of bursting, and over any multiple
//! of the weight sum each backend is selected exactly in proportion.

use std::sync::RwLock;

/// Selector entry for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedBackend {
    pub id: String,
    /// Nominal weight from configuration, at least 1
    pub weight: i64,
    /// Scratch accumulator driving the smooth schedule
    pub current_weight: i64,
    /// Dynamic weight, clamped to `[1, 2 * weight]`
    pub effective_weight: i64,
}

/// Weighted round-robin selector.
///
/// All mutating operations serialize on the inner lock; `next()` needs
/// exclusive access because it updates the accumulators. `snapshot()` copies
/// the entries under the shared read lock.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    backends: RwLock<Vec<WeightedBackend>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }

    /// Adds a backend. Weights below 1 are coerced to 1.
    pub fn add(&self, id: impl Into<String>, weight: i64) {
        let weight = weight.max(1);
        self.backends.write().unwrap().push(WeightedBackend {
            id: id.into(),
            weight,
            current_weight: 0,
            effective_weight: weight,
        });
    }

    /// Removes a backend by id. Returns false when the id is unknown.
    pub fn remove(&self, id: &str) -> bool {
        let mut backends = self.backends.write().unwrap();
        let before = backends.len();
        backends.retain(|b| b.id != id);
        backends.len() != before
    }

    /// Selects the next backend, or None when the set is empty.
    ///
    /// Ties break in insertion order.
    pub fn next(&self) -> Option<String> {
        let mut backends = self.backends.write().unwrap();
        if backends.is_empty() {
            return None;
        }

        let mut total = 0i64;
        for backend in backends.iter_mut() {
            backend.current_weight += backend.effective_weight;
            total += backend.effective_weight;
        }

        let mut best = 0;
        for (i, backend) in backends.iter().enumerate() {
            if backend.current_weight > backends[best].current_weight {
                best = i;
            }
        }

        backends[best].current_weight -= total;
        Some(backends[best].id.clone())
    }

    /// Replaces a backend's nominal weight, resetting its effective weight.
    ///
    /// Returns false when the id is unknown. Weights below 1 are coerced.
    pub fn update_weight(&self, id: &str, weight: i64) -> bool {
        let mut backends = self.backends.write().unwrap();
        match backends.iter_mut().find(|b| b.id == id) {
            Some(backend) => {
                let weight = weight.max(1);
                backend.weight = weight;
                backend.effective_weight = weight;
                true
            }
            None => false,
        }
    }

    /// Applies a delta to a backend's effective weight, then clamps it to
    /// `[1, 2 * nominal]`. Returns false when the id is unknown.
    pub fn adjust_effective(&self, id: &str, delta: i64) -> bool {
        let mut backends = self.backends.write().unwrap();
        match backends.iter_mut().find(|b| b.id == id) {
            Some(backend) => {
                backend.effective_weight =
                    (backend.effective_weight + delta).clamp(1, backend.weight * 2);
                true
            }
            None => false,
        }
    }

    /// Resets all accumulators and effective weights to their nominal values.
    pub fn reset(&self) {
        let mut backends = self.backends.write().unwrap();
        for backend in backends.iter_mut() {
            backend.current_weight = 0;
            backend.effective_weight = backend.weight;
        }
    }

    /// Returns a copy of the selector state.
    pub fn snapshot(&self) -> Vec<WeightedBackend> {
        self.backends.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.backends.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().unwrap().is_empty()
    }
}
