//! Rolling reconfiguration: batched rollout and rollback of the backend set.
//!
//! A rollout walks the desired URL list in prefix-growing batches, installing
//! each prefix as the live set and pausing between batches. The pre-existing
//! set is captured up front; any install failure, and cancellation between
//! batches, restores it best-effort before the error bubbles out. Only one
//! rollout or rollback runs at a time.

use std::time::Duration;
use tracing::{info, warn};

use lodestone_common::error::{ErrorKind, LbError, Result};
use lodestone_common::shutdown::ShutdownHandle;

use crate::balancer::LoadBalancer;

const DEFAULT_BATCH_SIZE: usize = 1;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Parameters for a gradual rollout of new backends.
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    pub new_backends: Vec<String>,
    /// Backends added per step; non-positive defaults to 1
    pub batch_size: usize,
    /// Pause between steps; non-positive defaults to 30 s
    pub interval: Duration,
}

/// Parameters for reverting to a previous backend list.
#[derive(Debug, Clone)]
pub struct RollbackConfig {
    pub previous_backends: Vec<String>,
    pub batch_size: usize,
    pub interval: Duration,
}

impl LoadBalancer {
    /// Gradually replaces the active set with `new_backends`.
    pub async fn rollout(&self, shutdown: &ShutdownHandle, config: RolloutConfig) -> Result<()> {
        self.replace_in_batches(
            shutdown,
            config.new_backends,
            config.batch_size,
            config.interval,
            "rollout",
        )
        .await
    }

    /// Reverts the active set to `previous_backends`, batched the same way.
    pub async fn rollback(&self, shutdown: &ShutdownHandle, config: RollbackConfig) -> Result<()> {
        self.replace_in_batches(
            shutdown,
            config.previous_backends,
            config.batch_size,
            config.interval,
            "rollback",
        )
        .await
    }

    async fn replace_in_batches(
        &self,
        shutdown: &ShutdownHandle,
        targets: Vec<String>,
        batch_size: usize,
        interval: Duration,
        op: &str,
    ) -> Result<()> {
        if targets.is_empty() {
            return Err(LbError::new(
                ErrorKind::ConfigInvalid,
                format!("no backends provided for {op}"),
            ));
        }
        let batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };
        let interval = if interval.is_zero() { DEFAULT_INTERVAL } else { interval };

        let _guard = self.reconfig_lock.lock().await;
        let snapshot = self.backend_urls();
        let mut shutdown = shutdown.clone();

        let mut installed = 0;
        while installed < targets.len() {
            if shutdown.is_triggered() {
                self.restore(&snapshot, op);
                return Err(LbError::new(ErrorKind::Cancelled, format!("{op} cancelled")));
            }

            let end = (installed + batch_size).min(targets.len());
            if let Err(err) = self.install(&targets[..end]) {
                warn!("{op} failed at backend {}: {err}", end - 1);
                self.restore(&snapshot, op);
                return Err(LbError::wrap(ErrorKind::ConfigInvalid, format!("{op} failed"), err));
            }
            installed = end;
            info!(installed, total = targets.len(), "{op} batch installed");

            if installed < targets.len() {
                tokio::select! {
                    _ = shutdown.triggered() => {
                        self.restore(&snapshot, op);
                        return Err(LbError::new(ErrorKind::Cancelled, format!("{op} cancelled")));
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        info!(backends = targets.len(), "{op} complete");
        Ok(())
    }

    /// Best-effort restore of the captured snapshot. Failures are logged,
    /// not surfaced.
    fn restore(&self, snapshot: &[String], op: &str) {
        if let Err(err) = self.install(snapshot) {
            warn!("failed to restore previous backends after aborted {op}: {err}");
        }
    }
}
