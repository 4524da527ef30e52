//! Persistent job storage.
//!
//! This module provides the shared store that all worker loops coordinate
//! through. Every state change is a conditional single-row update, so the
//! store is the only concurrency-control point of the system.
//!
//! # Overview
//!
//! The storage system consists of:
//! - **JobStore**: the backend-agnostic contract (claim, finalize, inspect)
//! - **PgJobStore**: PostgreSQL backend for production
//! - **MemoryJobStore**: in-process backend for tests and local development
//! - **Migrations**: schema management for the PostgreSQL backend
//!
//! # Usage
//!
//! ```rust,ignore
//! use hookline::storage::{JobStore, PgJobStore};
//! use hookline::scheduler::{Lease, NewJob};
//!
//! let store = PgJobStore::connect("postgres://localhost/hookline").await?;
//! store.run_migrations().await?;
//!
//! let job = store.enqueue(NewJob::new(serde_json::json!({"event": "comment"}))).await?;
//! if let Some(claimed) = store.claim_next("standard-0", 3, chrono::Utc::now()).await? {
//!     let lease = Lease::new(claimed.id, "standard-0", claimed.attempts);
//!     store.complete(&lease, chrono::Utc::now()).await?;
//! }
//! ```

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::scheduler::job::{
    DeadLetter, Job, JobId, Lease, NewJob, ReclaimReport, StatusCounts,
};

pub use memory::MemoryJobStore;
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
pub use postgres::PgJobStore;

/// Contract shared by all job store backends.
///
/// Finalizing operations (`complete`, `schedule_retry`, `fail`) only apply
/// while `lease` is the job's current claim: `processing`, held by
/// `lease.worker_id`, at attempt `lease.attempt`. Otherwise they return
/// `StoreError::OwnershipLost` and change nothing.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Inserts a new pending job.
    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError>;

    /// Fetches a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Atomically claims the oldest eligible job for `worker_id`.
    ///
    /// Eligible means `pending`, `retry_at` absent or not after `now`, and
    /// `attempts < max_retries`. Ordering is `(priority, created_at)`.
    /// Returns `None` when nothing is eligible.
    async fn claim_next(
        &self,
        worker_id: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Marks an owned job completed.
    async fn complete(&self, lease: &Lease, now: DateTime<Utc>) -> Result<Job, StoreError>;

    /// Returns an owned job to `pending`, claimable from `retry_at`.
    async fn schedule_retry(
        &self,
        lease: &Lease,
        retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Job, StoreError>;

    /// Marks an owned job failed and writes its dead letter in the same unit.
    async fn fail(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<DeadLetter, StoreError>;

    /// Counts jobs per status.
    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;

    /// Counts jobs completed at or after `since`.
    async fn completed_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Lists dead letters, most recent failure first.
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError>;

    /// Fetches one dead letter by its own id.
    async fn get_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetter>, StoreError>;

    /// Enqueues a new pending job carrying the dead letter's payload.
    ///
    /// The dead letter and the original job are left untouched.
    async fn replay_dead_letter(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job, StoreError>;

    /// Reclaims jobs stuck in `processing` since before `cutoff`.
    ///
    /// Jobs with attempts left go back to `pending` (claimable at `now`);
    /// the rest are failed and dead-lettered.
    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<ReclaimReport, StoreError>;
}
