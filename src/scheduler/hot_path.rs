//! Standard and hot-path pools.
//!
//! The hot-path claimer is the same `WorkerPool` with a tighter poll
//! interval and more loops, aimed at picking up freshly enqueued jobs with
//! minimal latency. Claims are atomic, so both pools can run against one
//! store at the same time; `RunMode` selects which of them a process runs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use super::handler::PayloadHandler;
use super::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use super::worker_pool::{ActiveWorkers, PoolError, WorkerPool, WorkerPoolConfig};
use crate::config::QueueConfig;
use crate::storage::JobStore;

/// Name of the standard pool.
pub const STANDARD_POOL: &str = "standard";

/// Name of the hot-path pool.
pub const HOT_PATH_POOL: &str = "hot";

/// Which pools a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    Standard,
    HotPath,
    #[default]
    Both,
}

impl RunMode {
    pub fn runs_standard(&self) -> bool {
        matches!(self, RunMode::Standard | RunMode::Both)
    }

    pub fn runs_hot_path(&self) -> bool {
        matches!(self, RunMode::HotPath | RunMode::Both)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Standard => "standard",
            RunMode::HotPath => "hot-path",
            RunMode::Both => "both",
        })
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(RunMode::Standard),
            "hot-path" | "hot_path" | "hot" => Ok(RunMode::HotPath),
            "both" => Ok(RunMode::Both),
            other => Err(format!(
                "unknown run mode '{}', expected standard, hot-path or both",
                other
            )),
        }
    }
}

/// Pool configuration for the standard claimer.
pub fn standard_config(config: &QueueConfig) -> WorkerPoolConfig {
    WorkerPoolConfig::from_settings(STANDARD_POOL, &config.standard, config)
}

/// Pool configuration for the hot-path claimer.
pub fn hot_path_config(config: &QueueConfig) -> WorkerPoolConfig {
    WorkerPoolConfig::from_settings(HOT_PATH_POOL, &config.hot_path, config)
}

/// The pools one process runs, started and stopped together.
pub struct PoolSet {
    pools: Vec<WorkerPool>,
}

impl PoolSet {
    /// Builds the pools `mode` asks for, all sharing `store` and `handler`.
    pub fn new(
        mode: RunMode,
        config: &QueueConfig,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn PayloadHandler>,
    ) -> Self {
        let mut pools = Vec::new();

        if mode.runs_standard() {
            pools.push(WorkerPool::new(
                standard_config(config),
                Arc::clone(&store),
                Arc::clone(&handler),
            ));
        }

        if mode.runs_hot_path() {
            pools.push(WorkerPool::new(hot_path_config(config), store, handler));
        }

        Self { pools }
    }

    /// Wraps already-built pools.
    pub fn from_pools(pools: Vec<WorkerPool>) -> Self {
        Self { pools }
    }

    /// Starts every pool. If one fails, the ones already started stop claiming.
    pub fn start(&mut self) -> Result<(), PoolError> {
        for idx in 0..self.pools.len() {
            if let Err(e) = self.pools[idx].start() {
                for started in &self.pools[..idx] {
                    started.stop_claiming();
                }
                return Err(e);
            }
        }

        info!(
            pools = ?self.pools.iter().map(WorkerPool::name).collect::<Vec<_>>(),
            total_workers = self.total_workers(),
            "Pools started"
        );
        Ok(())
    }

    /// Drains all pools within the coordinator's grace period.
    pub async fn shutdown(&mut self, coordinator: &ShutdownCoordinator) -> ShutdownOutcome {
        coordinator.shutdown(&mut self.pools).await
    }

    /// Active-worker counters, one per pool.
    pub fn active_handles(&self) -> Vec<ActiveWorkers> {
        self.pools.iter().map(WorkerPool::active_handle).collect()
    }

    /// Loops currently holding a job, across all pools.
    pub fn active_workers(&self) -> usize {
        self.pools.iter().map(WorkerPool::active_workers).sum()
    }

    /// Configured loops across all pools.
    pub fn total_workers(&self) -> usize {
        self.pools.iter().map(|p| p.config().worker_count).sum()
    }

    pub fn pools(&self) -> &[WorkerPool] {
        &self.pools
    }
}
