//! Shutdown signal shared by listeners, rollouts and background tasks.
//!
//! A watch channel carries the "shutting down" flag, so a handle created (or
//! polled) after the trigger still observes it. Handles are cheap to clone
//! and every long-lived task holds its own.

use tokio::sync::watch;

/// Owning side of the shutdown signal; held by the process driver.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Creates a handle observing this signal.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Fires the signal. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires; immediately if it already has.
    ///
    /// A dropped `Shutdown` counts as triggered so orphaned tasks wind down.
    pub async fn triggered(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}
