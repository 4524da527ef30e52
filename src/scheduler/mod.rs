//! Job lifecycle and worker pools.
//!
//! This module provides everything between the store and the payload
//! handler:
//!
//! - **Job**: the persisted unit of work and its state machine
//! - **RetryPolicy**: exponential retry delays and the dead-letter decision
//! - **Worker**: one claim/execute/finalize loop
//! - **WorkerPool**: N workers sharing a stop signal and an active-worker count
//! - **PoolSet**: the standard and hot-path pools run side by side
//! - **StaleJobReaper**: returns jobs abandoned in `processing`
//! - **ShutdownCoordinator**: bounded, drain-first shutdown
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │ (webhook/CLI)│
//!                      └──────┬───────┘
//!                             │ enqueue
//!                      ┌──────▼───────┐       ┌──────────┐
//!                      │   JobStore   │◄──────┤  Reaper  │
//!                      │  (Postgres)  │       └──────────┘
//!                      └──────┬───────┘
//!                             │ claim (SKIP LOCKED)
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │standard-0│   ...  │  hot-0  │   ...   │ hot-49  │
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use hookline::scheduler::{HttpPayloadHandler, PoolSet, RunMode, ShutdownCoordinator};
//! use hookline::storage::PgJobStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(PgJobStore::connect(&config.database_url).await?);
//! let handler = Arc::new(HttpPayloadHandler::new(url, config.job_timeout())?);
//!
//! let mut pools = PoolSet::new(RunMode::Both, &config, store, handler);
//! pools.start()?;
//!
//! wait_for_signal().await?;
//! pools.shutdown(&ShutdownCoordinator::new(config.shutdown_grace())).await;
//! ```
//!
//! # Reliability Features
//!
//! - **Atomic claim**: one conditional update per claim, concurrent claimers skip locked rows
//! - **Ownership checks**: a worker can only finalize a job it still owns
//! - **Dead letters**: jobs out of attempts are recorded with their last error
//! - **Crash recovery**: the reaper requeues jobs whose worker vanished

pub mod handler;
pub mod hot_path;
pub mod job;
pub mod reaper;
pub mod retry;
pub mod shutdown;
pub mod worker;
pub mod worker_pool;

// Re-export main types for convenience
pub use handler::{handler_fn, FnHandler, HttpPayloadHandler, PayloadHandler};
pub use hot_path::{
    hot_path_config, standard_config, PoolSet, RunMode, HOT_PATH_POOL, STANDARD_POOL,
};
pub use job::{
    DeadLetter, Job, JobId, JobStatus, Lease, NewJob, ReclaimReport, StatusCounts,
    DEFAULT_PRIORITY,
};
pub use reaper::StaleJobReaper;
pub use retry::{IdleBackoff, RetryDecision, RetryPolicy};
pub use shutdown::{wait_for_signal, ShutdownCoordinator, ShutdownOutcome};
pub use worker::{FinalOutcome, Worker};
pub use worker_pool::{ActiveGuard, ActiveWorkers, PoolError, WorkerPool, WorkerPoolConfig};
