//! Worker pool for processing jobs from the shared job store.
//!
//! A pool spawns `worker_count` independent worker loops, each an async
//! task claiming from the same store. Loops never share in-memory state
//! beyond the stop flag and the active-worker counter, so one loop's
//! failures cannot affect its siblings.
//!
//! # Features
//!
//! - Configurable number of workers, poll interval and idle backoff ceiling
//! - Stop flag on a `watch` channel
//! - Retry with exponential backoff, dead letters for exhausted jobs
//! - Active-worker tracking for drain-aware shutdown

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::handler::PayloadHandler;
use super::retry::RetryPolicy;
use super::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use super::worker::Worker;
use crate::config::{PoolSettings, QueueConfig};
use crate::error::StoreError;
use crate::metrics::QueueMetrics;
use crate::storage::JobStore;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// The pool has nothing to run.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The store failed while starting up.
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Pool name, used as worker id prefix and metrics label.
    pub name: String,
    /// Number of worker loops to spawn.
    pub worker_count: usize,
    /// First sleep after an empty poll.
    pub poll_interval: Duration,
    /// Ceiling for the idle backoff.
    pub max_idle_interval: Duration,
    /// Maximum time allowed for a single handler call.
    pub job_timeout: Duration,
    /// Retry limit and base delay.
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "standard".to_string(),
            worker_count: 10,
            poll_interval: Duration::from_millis(100),
            max_idle_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified name and worker count.
    pub fn new(name: impl Into<String>, worker_count: usize) -> Self {
        Self {
            name: name.into(),
            worker_count,
            ..Default::default()
        }
    }

    /// Builds a pool configuration from queue-wide settings.
    pub fn from_settings(name: impl Into<String>, pool: &PoolSettings, queue: &QueueConfig) -> Self {
        Self {
            name: name.into(),
            worker_count: pool.worker_count,
            poll_interval: pool.poll_interval(),
            max_idle_interval: pool.max_idle_interval(),
            job_timeout: queue.job_timeout(),
            retry_policy: RetryPolicy::new(queue.max_retries, queue.base_retry_delay()),
        }
    }

    /// Sets the worker count.
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.max_idle_interval = self.max_idle_interval.max(interval);
        self
    }

    /// Sets the idle backoff ceiling.
    pub fn with_max_idle_interval(mut self, interval: Duration) -> Self {
        self.max_idle_interval = interval;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Number of worker loops of one pool that currently hold a claimed job.
///
/// Cheap to clone; all clones share the same counter.
#[derive(Debug, Clone)]
pub struct ActiveWorkers {
    pool: Arc<str>,
    count: Arc<AtomicUsize>,
    metrics: QueueMetrics,
}

impl ActiveWorkers {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: Arc::from(pool.into()),
            count: Arc::new(AtomicUsize::new(0)),
            metrics: QueueMetrics::new(),
        }
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Marks one loop busy until the returned guard drops.
    pub fn enter(&self) -> ActiveGuard {
        let active = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.set_active_workers(&self.pool, active);
        ActiveGuard {
            active: self.clone(),
        }
    }
}

/// Decrements the active count on drop, including when a loop is aborted.
#[derive(Debug)]
pub struct ActiveGuard {
    active: ActiveWorkers,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let active = self.active.count.fetch_sub(1, Ordering::SeqCst) - 1;
        self.active
            .metrics
            .set_active_workers(&self.active.pool, active);
    }
}

/// Worker pool that manages multiple worker loops claiming from one store.
pub struct WorkerPool {
    config: Arc<WorkerPoolConfig>,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn PayloadHandler>,
    stop_tx: watch::Sender<bool>,
    worker_handles: Vec<JoinHandle<()>>,
    active: ActiveWorkers,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new, stopped worker pool.
    pub fn new(
        config: WorkerPoolConfig,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn PayloadHandler>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let active = ActiveWorkers::new(config.name.clone());

        Self {
            config: Arc::new(config),
            store,
            handler,
            stop_tx,
            worker_handles: Vec::new(),
            active,
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        if self.config.worker_count == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "pool '{}' has no workers",
                self.config.name
            )));
        }

        // A fresh channel so a pool can be started again after shutdown.
        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = stop_tx;

        for i in 0..self.config.worker_count {
            let worker = Worker::new(
                format!("{}-{}", self.config.name, i),
                Arc::clone(&self.config),
                Arc::clone(&self.store),
                Arc::clone(&self.handler),
                self.active.clone(),
            );

            self.worker_handles
                .push(tokio::spawn(worker.run(stop_rx.clone())));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            pool = %self.config.name,
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Worker pool started"
        );

        Ok(())
    }

    /// Tells every loop to stop claiming. In-flight jobs still finish.
    pub fn stop_claiming(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Stops the pool, draining in-flight jobs for up to `grace`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NotRunning` if the pool was never started or is
    /// already shut down.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ShutdownOutcome, PoolError> {
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }

        let coordinator = ShutdownCoordinator::new(grace);
        Ok(coordinator.shutdown(std::slice::from_mut(self)).await)
    }

    /// Hands the loop tasks to the caller and marks the pool stopped.
    pub(crate) fn take_handles(&mut self) -> Vec<JoinHandle<()>> {
        self.is_running.store(false, Ordering::SeqCst);
        std::mem::take(&mut self.worker_handles)
    }

    /// Returns how many loops currently hold a claimed job.
    pub fn active_workers(&self) -> usize {
        self.active.get()
    }

    /// Returns a shared handle on the active-worker counter.
    pub fn active_handle(&self) -> ActiveWorkers {
        self.active.clone()
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the pool name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}
