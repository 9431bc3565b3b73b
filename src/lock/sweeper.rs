use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::LockManager;

/// Background task that periodically force-releases abandoned locks.
///
/// Conflicting acquisitions already reclaim a stale holder on their own; the
/// sweep makes sure locks left by a crashed process are also cleared for
/// targets nobody is currently asking for.
pub struct LockSweeper {
    manager: Arc<LockManager>,
    interval: Duration,
}

impl LockSweeper {
    pub fn new(
        manager: Arc<LockManager>,
        interval: Duration,
    ) -> Self {
        Self { manager, interval }
    }

    /// Runs one sweep. Errors are logged and swallowed so the loop survives a
    /// transient store failure.
    pub fn sweep_once(&self) -> usize {
        match self.manager.reclaim_stale() {
            Ok(n) => {
                if n > 0 {
                    info!("stale lock sweep reclaimed {} lock(s)", n);
                }
                n
            }
            Err(e) => {
                error!("stale lock sweep failed: {}", e);
                0
            }
        }
    }

    /// Sweeps every `interval` until `cancel` fires.
    ///
    /// Returns `None` without spawning when the manager has no staleness
    /// threshold configured.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.manager.stale_after().is_none() {
            debug!("stale lock sweep disabled: no staleness threshold configured");
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("stale lock sweep stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.sweep_once();
                    }
                }
            }
        }))
    }
}
