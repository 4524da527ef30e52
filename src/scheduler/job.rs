//! Job definitions for the scheduler.
//!
//! This module defines the records that flow through the queue:
//!
//! - `Job`: one inbound webhook event awaiting processing
//! - `NewJob`: what a producer hands to the store on enqueue
//! - `JobStatus`: the four lifecycle states
//! - `DeadLetter`: the immutable record of a job that exhausted its retries
//!
//! The transition methods on `Job` (`claim`, `mark_completed`, `mark_retry`,
//! `mark_failed`) are the in-process rendition of the state machine. Stores
//! that mutate rows in SQL mirror exactly the same field updates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job identifier.
pub type JobId = Uuid;

/// Default priority for jobs. Lower values are claimed first.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Error recorded on jobs whose processing lease expired.
pub const LEASE_EXPIRED_ERROR: &str = "processing lease expired";

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed (possibly not before `retry_at`).
    Pending,
    /// Owned by exactly one worker.
    Processing,
    /// Handler succeeded. Terminal.
    Completed,
    /// Retries exhausted and dead-lettered. Terminal.
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns whether no further transition can happen from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A job as submitted by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    /// Opaque payload understood only by the handler.
    pub payload: serde_json::Value,
    /// Claim priority (lower first).
    #[serde(default)]
    pub priority: i32,
}

impl NewJob {
    /// Creates a new job submission with default priority.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Sets the claim priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Materializes the submission into a pending job.
    pub fn into_job(self, created_at: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            payload: self.payload,
            status: JobStatus::Pending,
            attempts: 0,
            priority: self.priority,
            created_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            worker_id: None,
            processing_time_ms: None,
            last_error: None,
            retry_at: None,
        }
    }
}

/// A unit of work: one inbound event awaiting processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Opaque payload handed to the handler.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Number of claims so far.
    pub attempts: u32,
    /// Claim priority (lower first).
    pub priority: i32,
    /// When the producer enqueued the job.
    pub created_at: DateTime<Utc>,
    /// When the latest claim happened.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was dead-lettered.
    pub failed_at: Option<DateTime<Utc>>,
    /// Worker holding (or last holding) the job.
    pub worker_id: Option<String>,
    /// Wall time of the successful attempt.
    pub processing_time_ms: Option<i64>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Earliest time a retry may be claimed.
    pub retry_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Returns whether `claim_next` may select this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>, max_retries: u32) -> bool {
        self.status == JobStatus::Pending
            && self.retry_at.map_or(true, |at| at <= now)
            && self.attempts < max_retries
    }

    /// Returns whether `lease` is the job's current claim.
    pub fn is_held_under(&self, lease: &Lease) -> bool {
        self.id == lease.job_id
            && self.status == JobStatus::Processing
            && self.worker_id.as_deref() == Some(lease.worker_id.as_str())
            && self.attempts == lease.attempt
    }

    /// Returns the lease of the current claim, if the job is `processing`.
    pub fn lease(&self) -> Option<Lease> {
        match (&self.status, &self.worker_id) {
            (JobStatus::Processing, Some(worker_id)) => {
                Some(Lease::new(self.id, worker_id.as_str(), self.attempts))
            }
            _ => None,
        }
    }

    /// Moves the job into `processing` for `worker_id`.
    pub fn claim(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.worker_id = Some(worker_id.to_string());
        self.started_at = Some(now);
        self.attempts += 1;
    }

    /// Marks the job completed.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.processing_time_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0));
    }

    /// Returns the job to `pending`, not claimable before `retry_at`.
    pub fn mark_retry(&mut self, retry_at: DateTime<Utc>, error: impl Into<String>) {
        self.status = JobStatus::Pending;
        self.retry_at = Some(retry_at);
        self.last_error = Some(error.into());
    }

    /// Marks the job failed and builds its dead-letter record.
    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) -> DeadLetter {
        let error = error.into();
        self.status = JobStatus::Failed;
        self.failed_at = Some(now);
        self.last_error = Some(error.clone());

        DeadLetter {
            id: Uuid::new_v4(),
            original_job_id: self.id,
            payload: self.payload.clone(),
            attempts: self.attempts,
            error,
            created_at: self.created_at,
            failed_at: now,
        }
    }
}

/// One claim of a job: the worker holding it and the attempt it started.
///
/// Worker names repeat across processes, so the attempt number is what tells
/// the live claim apart from one the reaper already took back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lease {
    pub job_id: JobId,
    pub worker_id: String,
    pub attempt: u32,
}

impl Lease {
    pub fn new(job_id: JobId, worker_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            job_id,
            worker_id: worker_id.into(),
            attempt,
        }
    }
}

/// Durable record of a job that permanently failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Identifier of the dead-letter record itself.
    pub id: Uuid,
    /// The job that failed.
    pub original_job_id: JobId,
    /// Full payload, kept for replay.
    pub payload: serde_json::Value,
    /// Attempts consumed before giving up.
    pub attempts: u32,
    /// Final error message.
    pub error: String,
    /// When the original job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Builds a fresh submission carrying the same payload.
    pub fn to_new_job(&self, priority: i32) -> NewJob {
        NewJob::new(self.payload.clone()).with_priority(priority)
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    /// Adds `n` to the bucket for `status`.
    pub fn add(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
        }
    }

    /// Returns the count for `status`.
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }

    /// Returns the number of jobs in all states.
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Result of a stale-lease sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    /// Jobs returned to `pending`.
    pub requeued: Vec<JobId>,
    /// Jobs that had no attempts left and were dead-lettered.
    pub dead_lettered: Vec<JobId>,
}

impl ReclaimReport {
    /// Returns whether the sweep touched anything.
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.dead_lettered.is_empty()
    }

    /// Number of reclaimed jobs.
    pub fn len(&self) -> usize {
        self.requeued.len() + self.dead_lettered.len()
    }
}
