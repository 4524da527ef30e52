//! A single worker loop.
//!
//! Each iteration claims at most one job, runs the handler in its own task
//! under a timeout, then finalizes the job as completed, retry-pending, or
//! dead-lettered. Nothing inside an iteration ends the loop; only the stop
//! flag does.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use super::handler::PayloadHandler;
use super::job::{Job, Lease};
use super::retry::{IdleBackoff, RetryDecision};
use super::worker_pool::{ActiveWorkers, WorkerPoolConfig};
use crate::error::{ExhaustedRetries, ProcessingError, StoreError};
use crate::metrics::{ClaimResult, QueueMetrics};
use crate::storage::JobStore;

/// How a claimed job left the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    Completed,
    RetryScheduled { retry_at: chrono::DateTime<Utc> },
    DeadLettered,
    /// The finalizing write did not apply (ownership lost or store error).
    Unrecorded,
}

impl FinalOutcome {
    /// Metric label for the outcome.
    pub fn as_label(&self) -> &'static str {
        match self {
            FinalOutcome::Completed => "completed",
            FinalOutcome::RetryScheduled { .. } => "retry",
            FinalOutcome::DeadLettered => "dead_letter",
            FinalOutcome::Unrecorded => "unrecorded",
        }
    }
}

/// A single worker that claims and processes jobs from the store.
pub struct Worker {
    /// Loop name, `<pool>-<index>`. Only unique within one process.
    id: String,
    config: Arc<WorkerPoolConfig>,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn PayloadHandler>,
    active: ActiveWorkers,
    metrics: QueueMetrics,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        config: Arc<WorkerPoolConfig>,
        store: Arc<dyn JobStore>,
        handler: Arc<dyn PayloadHandler>,
        active: ActiveWorkers,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            store,
            handler,
            active,
            metrics: QueueMetrics::new(),
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main worker loop.
    ///
    /// Claims back to back while jobs are available and backs off while the
    /// queue is empty. Returns once `stop` reads `true` or its sender is
    /// dropped; an in-flight job is always finalized first.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(worker_id = %self.id, pool = %self.config.name, "Worker started");

        let mut backoff =
            IdleBackoff::new(self.config.poll_interval, self.config.max_idle_interval);

        loop {
            if *stop.borrow() {
                break;
            }

            let delay = match self.run_once().await {
                Ok(Some(_)) => {
                    backoff.reset();
                    continue;
                }
                Ok(None) => backoff.next_delay(),
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to claim job");
                    backoff.next_delay()
                }
            };

            if idle(delay, &mut stop).await {
                break;
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Claims and fully processes at most one job.
    ///
    /// Returns `Ok(None)` when nothing was eligible and `Err` only when the
    /// claim itself failed. Finalization errors are logged and reported as
    /// [`FinalOutcome::Unrecorded`].
    pub async fn run_once(&self) -> Result<Option<FinalOutcome>, StoreError> {
        let claimed = self
            .store
            .claim_next(&self.id, self.config.retry_policy.max_retries, Utc::now())
            .await;

        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.metrics.record_claim(&self.config.name, ClaimResult::Empty);
                return Ok(None);
            }
            Err(e) => {
                self.metrics.record_claim(&self.config.name, ClaimResult::Error);
                return Err(e);
            }
        };
        self.metrics
            .record_claim(&self.config.name, ClaimResult::Claimed);

        let _busy = self.active.enter();

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            attempt = job.attempts,
            "Processing job"
        );

        let started = Instant::now();
        let result = self.execute(&job).await;
        let elapsed = started.elapsed();

        let outcome = self.finalize(&job, result).await;
        self.metrics
            .record_outcome(&self.config.name, outcome.as_label(), elapsed);

        Ok(Some(outcome))
    }

    /// Runs the handler in its own task, bounded by the job timeout.
    ///
    /// On timeout the task keeps running detached; only its result is
    /// abandoned.
    async fn execute(&self, job: &Job) -> Result<(), ProcessingError> {
        let handler = Arc::clone(&self.handler);
        let payload = job.payload.clone();
        let task = tokio::spawn(async move { handler.process(payload).await });

        match tokio::time::timeout(self.config.job_timeout, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ProcessingError::Handler(format!("{:#}", e))),
            Ok(Err(join_err)) => Err(ProcessingError::Panicked(join_error_message(join_err))),
            Err(_) => Err(ProcessingError::Timeout(self.config.job_timeout)),
        }
    }

    /// Writes the attempt's result back to the store.
    async fn finalize(&self, job: &Job, result: Result<(), ProcessingError>) -> FinalOutcome {
        let now = Utc::now();
        let lease = Lease::new(job.id, self.id.as_str(), job.attempts);

        let err = match result {
            Ok(()) => {
                return match self.store.complete(&lease, now).await {
                    Ok(done) => {
                        info!(
                            worker_id = %self.id,
                            job_id = %job.id,
                            processing_time_ms = done.processing_time_ms.unwrap_or_default(),
                            "Job completed"
                        );
                        FinalOutcome::Completed
                    }
                    Err(e) => self.unrecorded(job, e),
                };
            }
            Err(err) => err,
        };

        let message = err.to_string();
        match self.config.retry_policy.decide(job.attempts, now) {
            RetryDecision::Retry { retry_at } => {
                match self
                    .store
                    .schedule_retry(&lease, retry_at, &message)
                    .await
                {
                    Ok(_) => {
                        warn!(
                            worker_id = %self.id,
                            job_id = %job.id,
                            attempt = job.attempts,
                            retry_at = %retry_at,
                            error = %message,
                            "Job failed, scheduled for retry"
                        );
                        FinalOutcome::RetryScheduled { retry_at }
                    }
                    Err(e) => self.unrecorded(job, e),
                }
            }
            RetryDecision::DeadLetter => {
                match self.store.fail(&lease, now, &message).await {
                    Ok(dead) => {
                        let exhausted = ExhaustedRetries {
                            job_id: job.id,
                            attempts: dead.attempts,
                            last_error: message,
                        };
                        error!(
                            worker_id = %self.id,
                            job_id = %job.id,
                            dead_letter_id = %dead.id,
                            error = %exhausted,
                            "Job moved to dead letters"
                        );
                        FinalOutcome::DeadLettered
                    }
                    Err(e) => self.unrecorded(job, e),
                }
            }
        }
    }

    fn unrecorded(&self, job: &Job, e: StoreError) -> FinalOutcome {
        match e {
            StoreError::OwnershipLost(_) => warn!(
                worker_id = %self.id,
                job_id = %job.id,
                "Job was reclaimed before it could be finalized"
            ),
            e => error!(
                worker_id = %self.id,
                job_id = %job.id,
                error = %e,
                "Failed to finalize job"
            ),
        }
        FinalOutcome::Unrecorded
    }
}

/// Sleeps for `delay` unless the stop flag flips first. Returns `true` to stop.
async fn idle(delay: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    debug!(delay_ms = delay.as_millis() as u64, "Queue empty, backing off");
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "handler task was cancelled".to_string();
    }
    panic_message(err.into_panic())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::handler::handler_fn;
    use crate::scheduler::job::{JobStatus, NewJob};
    use crate::scheduler::retry::RetryPolicy;
    use crate::storage::MemoryJobStore;
    use serde_json::json;

    fn worker_with<H: PayloadHandler>(
        store: Arc<MemoryJobStore>,
        handler: H,
        config: WorkerPoolConfig,
    ) -> Worker {
        let active = ActiveWorkers::new(config.name.clone());
        Worker::new(
            "test-0",
            Arc::new(config),
            store,
            Arc::new(handler),
            active,
        )
    }

    fn quick_config() -> WorkerPoolConfig {
        WorkerPoolConfig::new("test", 1)
            .with_job_timeout(Duration::from_millis(200))
            .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(FinalOutcome::Completed.as_label(), "completed");
        assert_eq!(FinalOutcome::DeadLettered.as_label(), "dead_letter");
        assert_eq!(FinalOutcome::Unrecorded.as_label(), "unrecorded");
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static str")), "static str");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_run_once_on_empty_queue() {
        let store = MemoryJobStore::arc();
        let worker = worker_with(store, handler_fn(|_| async { Ok(()) }), quick_config());
        assert_eq!(worker.run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_once_completes_job() {
        let store = MemoryJobStore::arc();
        let job = store.enqueue(NewJob::new(json!({"n": 1}))).await.unwrap();
        let worker = worker_with(store.clone(), handler_fn(|_| async { Ok(()) }), quick_config());

        assert_eq!(
            worker.run_once().await.unwrap(),
            Some(FinalOutcome::Completed)
        );

        let done = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 1);
        assert_eq!(done.worker_id.as_deref(), Some("test-0"));
        assert!(done.processing_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_handler_error_schedules_retry() {
        let store = MemoryJobStore::arc();
        let job = store.enqueue(NewJob::new(json!({}))).await.unwrap();
        let worker = worker_with(
            store.clone(),
            handler_fn(|_| async { anyhow::bail!("rate limited") }),
            quick_config(),
        );

        let outcome = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, FinalOutcome::RetryScheduled { .. }));

        let pending = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(pending.status, JobStatus::Pending);
        assert!(pending.retry_at.is_some());
        assert!(pending
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("rate limited")));
    }

    #[tokio::test]
    async fn test_handler_panic_counts_as_failure() {
        let store = MemoryJobStore::arc();
        let job = store.enqueue(NewJob::new(json!({}))).await.unwrap();
        let worker = worker_with(
            store.clone(),
            handler_fn(|payload: serde_json::Value| async move {
                if payload.is_object() {
                    panic!("handler bug");
                }
                Ok(())
            }),
            quick_config(),
        );

        let outcome = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, FinalOutcome::RetryScheduled { .. }));

        let pending = store.get(job.id).await.unwrap().unwrap();
        assert!(pending
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("handler bug")));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let store = MemoryJobStore::arc();
        let job = store.enqueue(NewJob::new(json!({}))).await.unwrap();
        let worker = worker_with(
            store.clone(),
            handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
            quick_config().with_job_timeout(Duration::from_millis(20)),
        );

        let outcome = worker.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, FinalOutcome::RetryScheduled { .. }));

        let pending = store.get(job.id).await.unwrap().unwrap();
        assert!(pending
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn test_last_attempt_dead_letters() {
        let store = MemoryJobStore::arc();
        let job = store.enqueue(NewJob::new(json!({"x": 1}))).await.unwrap();
        let worker = worker_with(
            store.clone(),
            handler_fn(|_| async { anyhow::bail!("permanent") }),
            quick_config().with_retry_policy(RetryPolicy::new(1, Duration::from_millis(1))),
        );

        assert_eq!(
            worker.run_once().await.unwrap(),
            Some(FinalOutcome::DeadLettered)
        );

        let failed = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let letters = store.list_dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].original_job_id, job.id);
    }

    #[tokio::test]
    async fn test_active_count_covers_processing_only() {
        let store = MemoryJobStore::arc();
        store.enqueue(NewJob::new(json!({}))).await.unwrap();
        let config = quick_config();
        let active = ActiveWorkers::new("test");
        let observed = active.clone();
        let worker = Worker::new(
            "test-0",
            Arc::new(config),
            store,
            Arc::new(handler_fn(move |_| {
                let observed = observed.clone();
                async move {
                    assert_eq!(observed.get(), 1);
                    Ok(())
                }
            })),
            active.clone(),
        );

        assert_eq!(worker.run_once().await.unwrap(), Some(FinalOutcome::Completed));
        assert_eq!(active.get(), 0);
    }

    #[tokio::test]
    async fn test_claim_error_is_returned() {
        let store = MemoryJobStore::arc();
        store.set_unavailable(true);
        let worker = worker_with(store, handler_fn(|_| async { Ok(()) }), quick_config());
        assert!(matches!(
            worker.run_once().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_run_survives_store_outage_and_stops() {
        let store = MemoryJobStore::arc();
        store.set_unavailable(true);
        let worker = worker_with(
            store.clone(),
            handler_fn(|_| async { Ok(()) }),
            quick_config().with_poll_interval(Duration::from_millis(5)),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.set_unavailable(false);
        let job = store.enqueue(NewJob::new(json!({}))).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.get(job.id).await.unwrap().unwrap().status != JobStatus::Completed {
            assert!(Instant::now() < deadline, "job never completed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}
