//! Stale-job reaper.
//!
//! A worker that dies mid-job (process killed, forced shutdown) leaves its
//! job in `processing` forever. The reaper periodically finds jobs whose
//! `started_at` is older than the stale timeout and hands them back: to
//! `pending` while attempts remain, to the dead-letter table otherwise.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::metrics::QueueMetrics;
use crate::scheduler::job::ReclaimReport;
use crate::storage::JobStore;

/// Periodically reclaims jobs stuck in `processing`.
pub struct StaleJobReaper {
    store: Arc<dyn JobStore>,
    stale_timeout: Duration,
    max_retries: u32,
    interval: Duration,
    metrics: QueueMetrics,
}

impl StaleJobReaper {
    /// Sweeps every half stale timeout by default.
    pub fn new(store: Arc<dyn JobStore>, stale_timeout: Duration, max_retries: u32) -> Self {
        Self {
            store,
            stale_timeout,
            max_retries,
            interval: (stale_timeout / 2).max(Duration::from_millis(1)),
            metrics: QueueMetrics::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reclaims every job started before `now - stale_timeout`.
    pub async fn sweep_once(&self) -> Result<ReclaimReport, StoreError> {
        let now = Utc::now();
        let stale_for = chrono::Duration::from_std(self.stale_timeout)
            .map_err(|e| StoreError::InvalidState(format!("stale timeout out of range: {}", e)))?;
        let cutoff = now - stale_for;

        let report = self
            .store
            .reclaim_stale(cutoff, self.max_retries, now)
            .await?;

        for job_id in &report.requeued {
            error!(
                job_id = %job_id,
                stale_timeout_ms = self.stale_timeout.as_millis() as u64,
                "Reclaimed stale job, returned to pending"
            );
        }
        for job_id in &report.dead_lettered {
            error!(
                job_id = %job_id,
                stale_timeout_ms = self.stale_timeout.as_millis() as u64,
                "Reclaimed stale job with no attempts left, dead-lettered"
            );
        }

        if report.is_empty() {
            debug!("Reaper sweep found no stale jobs");
        } else {
            self.metrics.record_reclaim(&report);
        }

        Ok(report)
    }

    /// Sweeps until `stop` flips to `true` or its sender is dropped.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            stale_timeout_ms = self.stale_timeout.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "Stale job reaper started"
        );

        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Reaper sweep failed");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Stale job reaper stopped");
    }

    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }
}
