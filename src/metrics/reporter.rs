//! Periodic queue snapshots.
//!
//! The reporter only reads from the store. Counts come from the store, not
//! from in-process tallies, so snapshots agree across processes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::collectors::QueueMetrics;
use crate::error::StoreError;
use crate::scheduler::job::{JobStatus, StatusCounts};
use crate::scheduler::worker_pool::ActiveWorkers;
use crate::storage::JobStore;

/// One observation of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Absent for one-off readings, which have no reporting history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    pub active_workers: usize,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub throughput_per_min: f64,
    pub success_rate_percent: f64,
}

impl MetricsSnapshot {
    /// Builds a snapshot from raw store readings.
    ///
    /// Throughput divides by at least one second of uptime. Success rate is
    /// 0.0 when no job has reached a terminal state.
    pub fn compute(
        uptime: Duration,
        active_workers: usize,
        counts: StatusCounts,
        completed_since_start: u64,
    ) -> Self {
        let uptime_minutes = (uptime.as_secs_f64() / 60.0).max(1.0 / 60.0);
        let terminal = counts.completed + counts.failed;
        let success_rate_percent = if terminal == 0 {
            0.0
        } else {
            counts.completed as f64 / terminal as f64 * 100.0
        };

        Self {
            uptime_seconds: Some(uptime.as_secs()),
            active_workers,
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            throughput_per_min: completed_since_start as f64 / uptime_minutes,
            success_rate_percent,
        }
    }

    /// Builds a snapshot whose throughput covers the trailing `window`.
    pub fn compute_over_window(
        window: Duration,
        active_workers: usize,
        counts: StatusCounts,
        completed_in_window: u64,
    ) -> Self {
        Self {
            uptime_seconds: None,
            ..Self::compute(window, active_workers, counts, completed_in_window)
        }
    }

    /// Returns the count for `status`.
    pub fn count(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }
}

/// Emits a `MetricsSnapshot` every interval until stopped.
pub struct MetricsReporter {
    store: Arc<dyn JobStore>,
    interval: Duration,
    active: Vec<ActiveWorkers>,
    started: Instant,
    started_at: DateTime<Utc>,
    metrics: QueueMetrics,
}

impl MetricsReporter {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            active: Vec::new(),
            started: Instant::now(),
            started_at: Utc::now(),
            metrics: QueueMetrics::new(),
        }
    }

    /// Adds a pool whose busy loops count towards `activeWorkers`.
    pub fn with_active_workers(mut self, active: ActiveWorkers) -> Self {
        self.active.push(active);
        self
    }

    /// Reads the store once and builds a snapshot.
    pub async fn snapshot(&self) -> Result<MetricsSnapshot, StoreError> {
        let counts = self.store.status_counts().await?;
        let completed = self.store.completed_since(self.started_at).await?;
        let active = self.active.iter().map(ActiveWorkers::get).sum();

        Ok(MetricsSnapshot::compute(
            self.started.elapsed(),
            active,
            counts,
            completed,
        ))
    }

    /// Reads the store once, measuring throughput over the trailing `window`
    /// instead of since this reporter was created.
    pub async fn window_snapshot(&self, window: Duration) -> Result<MetricsSnapshot, StoreError> {
        let lookback = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let since = Utc::now() - lookback;
        let counts = self.store.status_counts().await?;
        let completed = self.store.completed_since(since).await?;
        let active = self.active.iter().map(ActiveWorkers::get).sum();

        Ok(MetricsSnapshot::compute_over_window(window, active, counts, completed))
    }

    /// Reports until `stop` flips to `true` or its sender is dropped.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => self.report().await,
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    async fn report(&self) {
        match self.snapshot().await {
            Ok(snapshot) => {
                self.metrics.record_snapshot(&snapshot);
                info!(
                    uptime_seconds = snapshot.uptime_seconds.unwrap_or_default(),
                    active_workers = snapshot.active_workers,
                    pending = snapshot.pending,
                    processing = snapshot.processing,
                    completed = snapshot.completed,
                    failed = snapshot.failed,
                    throughput_per_min = snapshot.throughput_per_min,
                    success_rate_percent = snapshot.success_rate_percent,
                    "Queue metrics"
                );
            }
            Err(e) => {
                warn!(error = %e, "Skipping metrics tick, store read failed");
            }
        }
    }
}
