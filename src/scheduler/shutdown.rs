//! Graceful shutdown.
//!
//! Shutdown runs in three steps against every pool at once: raise the stop
//! flags, wait (bounded by the grace period) for the active-worker count to
//! reach zero, then join the loop tasks within whatever grace is left.
//! Loops still busy when the grace period ends are aborted; their jobs stay
//! `processing` until the reaper reclaims them.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::worker_pool::WorkerPool;

/// How often the active-worker count is re-read while draining.
pub const DEFAULT_DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Result of a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight job was finalized.
    Drained,
    /// The grace period ran out with loops still busy.
    Forced { still_active: usize },
}

impl ShutdownOutcome {
    pub fn is_drained(&self) -> bool {
        matches!(self, ShutdownOutcome::Drained)
    }
}

/// Drains one or more pools within a shared grace period.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    grace: Duration,
    poll_interval: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            poll_interval: DEFAULT_DRAIN_POLL_INTERVAL,
        }
    }

    /// Sets how often the active count is checked while draining.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Stops every pool and waits for in-flight work to finish.
    pub async fn shutdown(&self, pools: &mut [WorkerPool]) -> ShutdownOutcome {
        let deadline = Instant::now() + self.grace;

        info!(
            pools = pools.len(),
            grace_ms = self.grace.as_millis() as u64,
            "Initiating worker pool shutdown"
        );

        for pool in pools.iter() {
            pool.stop_claiming();
        }

        loop {
            let remaining = total_active(pools);
            if remaining == 0 {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                return self.force(pools, remaining);
            }

            info!(
                active_workers = remaining,
                grace_left_ms = (deadline - now).as_millis() as u64,
                "Waiting for in-flight jobs"
            );
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        let mut handles: Vec<_> = pools.iter_mut().flat_map(WorkerPool::take_handles).collect();
        let joined = tokio::time::timeout_at(deadline, join_all(handles.iter_mut())).await;

        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task panicked during shutdown");
                    }
                }
                info!("Worker pool shutdown complete");
                ShutdownOutcome::Drained
            }
            Err(_) => {
                for handle in &handles {
                    handle.abort();
                }
                let still_active = total_active(pools);
                warn!(
                    still_active,
                    "Grace period elapsed while joining workers, aborting"
                );
                ShutdownOutcome::Forced { still_active }
            }
        }
    }

    fn force(&self, pools: &mut [WorkerPool], still_active: usize) -> ShutdownOutcome {
        warn!(
            still_active,
            grace_ms = self.grace.as_millis() as u64,
            "Grace period elapsed with jobs in flight, forcing shutdown"
        );

        for pool in pools.iter_mut() {
            for handle in pool.take_handles() {
                handle.abort();
            }
        }

        ShutdownOutcome::Forced { still_active }
    }
}

fn total_active(pools: &[WorkerPool]) -> usize {
    pools.iter().map(WorkerPool::active_workers).sum()
}

/// Resolves on SIGINT (Ctrl-C) or, on Unix, SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
