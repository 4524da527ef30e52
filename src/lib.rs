//! hookline: persistent job queue and worker pools for webhook ingestion.
//!
//! Incoming webhook payloads are stored as jobs, claimed atomically by
//! pools of concurrent workers, retried with exponential backoff and
//! dead-lettered once their attempts run out.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use config::{ConfigError, PoolSettings, QueueConfig};
pub use error::{ExhaustedRetries, ProcessingError, StoreError};
pub use scheduler::{Job, JobStatus, NewJob, PayloadHandler, PoolSet, RunMode, WorkerPool};
pub use storage::{JobStore, MemoryJobStore, PgJobStore};
