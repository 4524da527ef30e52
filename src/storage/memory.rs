//! In-process job store for tests and local development.
//!
//! All state sits behind one async mutex, so selection and mutation of a
//! claim happen in a single critical section.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::JobStore;
use crate::error::StoreError;
use crate::scheduler::job::{
    DeadLetter, Job, JobId, JobStatus, Lease, NewJob, ReclaimReport, StatusCounts,
    DEFAULT_PRIORITY, LEASE_EXPIRED_ERROR,
};

#[derive(Debug, Default)]
struct Inner {
    /// Jobs in insertion order.
    jobs: Vec<Job>,
    index: HashMap<JobId, usize>,
    dead_letters: Vec<DeadLetter>,
}

impl Inner {
    fn insert(&mut self, job: Job) {
        self.index.insert(job.id, self.jobs.len());
        self.jobs.push(job);
    }

    fn get(&self, id: JobId) -> Option<&Job> {
        self.index.get(&id).map(|&idx| &self.jobs[idx])
    }

    fn held_mut(&mut self, lease: &Lease) -> Result<&mut Job, StoreError> {
        let id = lease.job_id;
        let idx = *self.index.get(&id).ok_or(StoreError::NotFound(id))?;
        let job = &mut self.jobs[idx];
        if !job.is_held_under(lease) {
            return Err(StoreError::OwnershipLost(id));
        }
        Ok(job)
    }
}

/// In-memory `JobStore`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes every operation fail with `StoreError::Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns a copy of every job in insertion order.
    pub async fn snapshot(&self) -> Vec<Job> {
        self.inner.lock().await.jobs.clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn enqueue(&self, job: NewJob) -> Result<Job, StoreError> {
        self.check_available()?;
        let job = job.into_job(Utc::now());
        self.inner.lock().await.insert(job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;

        // min_by_key keeps the first of equal keys, i.e. insertion order.
        let next = inner
            .jobs
            .iter_mut()
            .filter(|job| job.is_eligible(now, max_retries))
            .min_by_key(|job| (job.priority, job.created_at));

        Ok(next.map(|job| {
            job.claim(worker_id, now);
            job.clone()
        }))
    }

    async fn complete(&self, lease: &Lease, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let job = inner.held_mut(lease)?;
        job.mark_completed(now);
        Ok(job.clone())
    }

    async fn schedule_retry(
        &self,
        lease: &Lease,
        retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Job, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let job = inner.held_mut(lease)?;
        job.mark_retry(retry_at, error);
        Ok(job.clone())
    }

    async fn fail(
        &self,
        lease: &Lease,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<DeadLetter, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let dead = inner.held_mut(lease)?.mark_failed(now, error);
        inner.dead_letters.push(dead.clone());
        Ok(dead)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for job in &inner.jobs {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn completed_since(&self, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let count = inner
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Completed)
            .filter(|job| job.completed_at.is_some_and(|at| at >= since))
            .count();
        Ok(count as u64)
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut letters = inner.dead_letters.clone();
        letters.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        letters.truncate(limit);
        Ok(letters)
    }

    async fn get_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetter>, StoreError> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner.dead_letters.iter().find(|d| d.id == id).cloned())
    }

    async fn replay_dead_letter(&self, id: Uuid, now: DateTime<Utc>) -> Result<Job, StoreError> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let dead = inner
            .dead_letters
            .iter()
            .find(|d| d.id == id)
            .ok_or(StoreError::DeadLetterNotFound(id))?;

        let job = dead.to_new_job(DEFAULT_PRIORITY).into_job(now);
        inner.insert(job.clone());
        Ok(job)
    }

    async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<ReclaimReport, StoreError> {
        self.check_available()?;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let mut report = ReclaimReport::default();

        for job in inner.jobs.iter_mut() {
            let stale = job.status == JobStatus::Processing
                && job.started_at.is_some_and(|started| started < cutoff);
            if !stale {
                continue;
            }

            if job.attempts < max_retries {
                job.mark_retry(now, LEASE_EXPIRED_ERROR);
                job.worker_id = None;
                report.requeued.push(job.id);
            } else {
                let dead = job.mark_failed(now, LEASE_EXPIRED_ERROR);
                inner.dead_letters.push(dead);
                report.dead_lettered.push(job.id);
            }
        }

        Ok(report)
    }
}
