//! Error types for hookline operations.
//!
//! Defines the error types shared across subsystems:
//! - Job store access (Postgres and in-memory backends)
//! - Job processing (handler failures, timeouts, panics)
//! - Retry exhaustion reporting

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::job::JobId;
use crate::storage::migrations::MigrationError;

/// Errors that can occur while talking to the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all.
    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Job '{0}' not found")]
    NotFound(JobId),

    #[error("Dead letter '{0}' not found")]
    DeadLetterNotFound(uuid::Uuid),

    /// The finalizing lease is no longer the job's current claim.
    #[error("Worker no longer owns job '{0}'")]
    OwnershipLost(JobId),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Invalid stored state: {0}")]
    InvalidState(String),
}

impl StoreError {
    /// Returns whether the error means the store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Query(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

/// Errors produced by a single processing attempt.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// A job used up its attempts and was moved to the dead-letter store.
#[derive(Debug, Error)]
#[error("Job '{job_id}' exhausted retries after {attempts} attempts: {last_error}")]
pub struct ExhaustedRetries {
    pub job_id: JobId,
    pub attempts: u32,
    pub last_error: String,
}
