//! End-to-end worker pool behaviour against the in-memory store.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hookline::scheduler::{
    handler_fn, ActiveWorkers, FinalOutcome, JobStatus, NewJob, PayloadHandler, PoolSet,
    RetryPolicy, ShutdownCoordinator, ShutdownOutcome, StaleJobReaper, Worker, WorkerPool,
    WorkerPoolConfig,
};
use hookline::storage::{JobStore, MemoryJobStore};
use serde_json::json;
use tokio::time::Instant;

fn pool_config(name: &str, workers: usize, max_retries: u32) -> WorkerPoolConfig {
    WorkerPoolConfig::new(name, workers)
        .with_poll_interval(Duration::from_millis(5))
        .with_max_idle_interval(Duration::from_millis(20))
        .with_job_timeout(Duration::from_secs(5))
        .with_retry_policy(RetryPolicy::new(max_retries, Duration::from_millis(10)))
}

fn succeed() -> Arc<dyn PayloadHandler> {
    Arc::new(handler_fn(|_| async { Ok(()) }))
}

fn always_fail() -> Arc<dyn PayloadHandler> {
    Arc::new(handler_fn(|_| async { Err(anyhow::anyhow!("graph api returned 500")) }))
}

fn hang_for(duration: Duration) -> Arc<dyn PayloadHandler> {
    Arc::new(handler_fn(move |_| async move {
        tokio::time::sleep(duration).await;
        Ok(())
    }))
}

/// Polls `check` until it holds or `timeout` passes.
async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn count(store: &MemoryJobStore, status: JobStatus) -> u64 {
    store.status_counts().await.unwrap().get(status)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_double_claim_under_concurrency() {
    let store = MemoryJobStore::arc();
    for i in 0..20 {
        store.enqueue(NewJob::new(json!({ "n": i }))).await.unwrap();
    }

    let mut claimers = Vec::new();
    for i in 0..50 {
        let store = Arc::clone(&store);
        claimers.push(tokio::spawn(async move {
            let worker_id = format!("claimer-{}", i);
            let mut claimed = Vec::new();
            while let Some(job) = store
                .claim_next(&worker_id, 3, chrono::Utc::now())
                .await
                .unwrap()
            {
                assert_eq!(job.worker_id.as_deref(), Some(worker_id.as_str()));
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for claimer in claimers {
        all.extend(claimer.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
    assert_eq!(count(&store, JobStatus::Processing).await, 20);
}

#[tokio::test]
async fn test_always_failing_job_is_dead_lettered_after_max_retries() {
    let store = MemoryJobStore::arc();
    let job = store
        .enqueue(NewJob::new(json!({ "object": "instagram" })))
        .await
        .unwrap();

    let mut pool = WorkerPool::new(pool_config("standard", 1, 3), store.clone(), always_fail());
    pool.start().unwrap();

    let done = eventually(Duration::from_secs(5), || async {
        count(&store, JobStatus::Failed).await == 1
    })
    .await;
    assert!(done, "job should reach failed");
    pool.shutdown(Duration::from_secs(2)).await.unwrap();

    let failed = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert!(failed.failed_at.is_some());

    let dead_letters = store.list_dead_letters(10).await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].original_job_id, job.id);
    assert_eq!(dead_letters[0].attempts, 3);
    assert_eq!(dead_letters[0].payload, job.payload);
    assert!(dead_letters[0].error.contains("graph api returned 500"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifty_jobs_ten_loops_all_complete_once() {
    let store = MemoryJobStore::arc();
    for i in 0..50 {
        store.enqueue(NewJob::new(json!({ "n": i }))).await.unwrap();
    }

    let mut pool = WorkerPool::new(pool_config("standard", 10, 3), store.clone(), succeed());
    pool.start().unwrap();

    let done = eventually(Duration::from_secs(10), || async {
        count(&store, JobStatus::Completed).await == 50
    })
    .await;
    assert!(done, "all jobs should complete");

    let outcome = pool.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);

    let jobs = store.snapshot().await;
    assert_eq!(jobs.len(), 50);
    assert_eq!(jobs.iter().map(|j| j.attempts).sum::<u32>(), 50);
    assert!(jobs.iter().all(|j| j.completed_at.is_some()));
    assert!(store.list_dead_letters(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hanging_handler_times_out_and_loop_resumes() {
    let store = MemoryJobStore::arc();
    let hung = store
        .enqueue(NewJob::new(json!({ "hang": true })).with_priority(-1))
        .await
        .unwrap();
    let normal = store.enqueue(NewJob::new(json!({ "hang": false }))).await.unwrap();

    let handler: Arc<dyn PayloadHandler> = Arc::new(handler_fn(|payload| async move {
        if payload["hang"] == json!(true) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(())
    }));
    let config = pool_config("standard", 1, 2).with_job_timeout(Duration::from_millis(50));
    let mut pool = WorkerPool::new(config, store.clone(), handler);
    pool.start().unwrap();

    let done = eventually(Duration::from_secs(5), || async {
        let counts = store.status_counts().await.unwrap();
        counts.failed == 1 && counts.completed == 1
    })
    .await;
    assert!(done, "hung job should fail and the other complete");
    pool.shutdown(Duration::from_secs(2)).await.unwrap();

    let hung = store.get(hung.id).await.unwrap().unwrap();
    assert_eq!(hung.status, JobStatus::Failed);
    assert_eq!(hung.attempts, 2);
    assert!(hung.last_error.unwrap().contains("timed out"));

    let normal = store.get(normal.id).await.unwrap().unwrap();
    assert_eq!(normal.status, JobStatus::Completed);
    assert_eq!(normal.attempts, 1);
}

#[tokio::test]
async fn test_forced_shutdown_leaves_jobs_processing() {
    let store = MemoryJobStore::arc();
    for i in 0..5 {
        store.enqueue(NewJob::new(json!({ "n": i }))).await.unwrap();
    }

    let config = pool_config("standard", 5, 3).with_job_timeout(Duration::from_secs(60));
    let mut pool = WorkerPool::new(config, store.clone(), hang_for(Duration::from_secs(30)));
    pool.start().unwrap();

    let busy = eventually(Duration::from_secs(5), || async { pool.active_workers() == 5 }).await;
    assert!(busy, "all five loops should hold a job");

    let started = Instant::now();
    let outcome = pool.shutdown(Duration::from_millis(200)).await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Forced { still_active: 5 });
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!pool.is_running());

    assert_eq!(count(&store, JobStatus::Processing).await, 5);
    assert_eq!(count(&store, JobStatus::Completed).await, 0);
}

#[tokio::test]
async fn test_clean_shutdown_drains_in_flight_jobs() {
    let store = MemoryJobStore::arc();
    for i in 0..3 {
        store.enqueue(NewJob::new(json!({ "n": i }))).await.unwrap();
    }

    let mut pool = WorkerPool::new(
        pool_config("standard", 3, 3),
        store.clone(),
        hang_for(Duration::from_millis(150)),
    );
    pool.start().unwrap();

    let busy = eventually(Duration::from_secs(5), || async { pool.active_workers() == 3 }).await;
    assert!(busy);

    let outcome = pool.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_eq!(pool.active_workers(), 0);
    assert_eq!(count(&store, JobStatus::Completed).await, 3);
}

#[tokio::test]
async fn test_reaper_recovers_jobs_abandoned_by_forced_shutdown() {
    let store = MemoryJobStore::arc();
    for i in 0..2 {
        store.enqueue(NewJob::new(json!({ "n": i }))).await.unwrap();
    }

    let config = pool_config("standard", 2, 3).with_job_timeout(Duration::from_secs(60));
    let mut stuck = WorkerPool::new(config, store.clone(), hang_for(Duration::from_secs(30)));
    stuck.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || async { stuck.active_workers() == 2 }).await);
    let outcome = stuck.shutdown(Duration::from_millis(50)).await.unwrap();
    assert!(!outcome.is_drained());

    tokio::time::sleep(Duration::from_millis(30)).await;
    let reaper = StaleJobReaper::new(store.clone(), Duration::from_millis(20), 3);
    let report = reaper.sweep_once().await.unwrap();
    assert_eq!(report.requeued.len(), 2);
    assert!(report.dead_lettered.is_empty());
    assert_eq!(count(&store, JobStatus::Pending).await, 2);

    let mut pool = WorkerPool::new(pool_config("standard", 2, 3), store.clone(), succeed());
    pool.start().unwrap();
    let done = eventually(Duration::from_secs(5), || async {
        count(&store, JobStatus::Completed).await == 2
    })
    .await;
    assert!(done, "reclaimed jobs should complete");
    pool.shutdown(Duration::from_secs(2)).await.unwrap();

    for job in store.snapshot().await {
        assert_eq!(job.attempts, 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reclaimed_loop_cannot_finalize_same_named_loop_claim() {
    let store = MemoryJobStore::arc();
    let job = store.enqueue(NewJob::new(json!({"event": "comment"}))).await.unwrap();

    // Two processes, each with a loop called standard-0.
    let config = Arc::new(pool_config("standard", 1, 3).with_job_timeout(Duration::from_secs(10)));
    let stalled = Worker::new(
        "standard-0",
        Arc::clone(&config),
        store.clone(),
        hang_for(Duration::from_millis(500)),
        ActiveWorkers::new("process-a"),
    );
    let live = Worker::new(
        "standard-0",
        Arc::clone(&config),
        store.clone(),
        hang_for(Duration::from_secs(2)),
        ActiveWorkers::new("process-b"),
    );

    let stalled_run = tokio::spawn(async move { stalled.run_once().await });
    let claimed = eventually(Duration::from_secs(5), || async {
        count(&store, JobStatus::Processing).await == 1
    })
    .await;
    assert!(claimed);

    let now = chrono::Utc::now();
    let report = store
        .reclaim_stale(now + chrono::Duration::seconds(1), 3, now)
        .await
        .unwrap();
    assert_eq!(report.requeued, vec![job.id]);

    let live_run = tokio::spawn(async move { live.run_once().await });
    let reclaimed = eventually(Duration::from_secs(5), || async {
        store.get(job.id).await.unwrap().unwrap().attempts == 2
    })
    .await;
    assert!(reclaimed);

    let stalled_outcome = stalled_run.await.unwrap().unwrap();
    assert_eq!(stalled_outcome, Some(FinalOutcome::Unrecorded));

    let current = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Processing);
    assert_eq!(current.attempts, 2);
    assert!(current.completed_at.is_none());

    let live_outcome = live_run.await.unwrap().unwrap();
    assert_eq!(live_outcome, Some(FinalOutcome::Completed));
    assert_eq!(count(&store, JobStatus::Completed).await, 1);
}

#[tokio::test]
async fn test_replayed_dead_letter_is_processed_as_new_job() {
    let store = MemoryJobStore::arc();
    let original = store
        .enqueue(NewJob::new(json!({ "entry": "abc" })))
        .await
        .unwrap();

    let healthy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    let handler: Arc<dyn PayloadHandler> = Arc::new(handler_fn(move |_| {
        let healthy = flag.load(Ordering::SeqCst);
        async move {
            if healthy {
                Ok(())
            } else {
                Err(anyhow::anyhow!("downstream unavailable"))
            }
        }
    }));

    let mut pool = WorkerPool::new(pool_config("standard", 1, 1), store.clone(), handler);
    pool.start().unwrap();

    assert!(
        eventually(Duration::from_secs(5), || async {
            count(&store, JobStatus::Failed).await == 1
        })
        .await
    );

    let dead = store.list_dead_letters(1).await.unwrap().remove(0);
    assert_eq!(dead.original_job_id, original.id);

    healthy.store(true, Ordering::SeqCst);
    let replayed = store
        .replay_dead_letter(dead.id, chrono::Utc::now())
        .await
        .unwrap();
    assert_ne!(replayed.id, original.id);
    assert_eq!(replayed.payload, original.payload);

    assert!(
        eventually(Duration::from_secs(5), || async {
            count(&store, JobStatus::Completed).await == 1
        })
        .await
    );
    pool.shutdown(Duration::from_secs(2)).await.unwrap();

    let original = store.get(original.id).await.unwrap().unwrap();
    assert_eq!(original.status, JobStatus::Failed);
    assert_eq!(store.list_dead_letters(10).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_standard_and_hot_path_pools_share_one_store() {
    let store = MemoryJobStore::arc();
    let shared: Arc<dyn JobStore> = store.clone();
    for i in 0..100 {
        store.enqueue(NewJob::new(json!({ "n": i }))).await.unwrap();
    }

    let mut pools = PoolSet::from_pools(vec![
        WorkerPool::new(pool_config("standard", 4, 3), Arc::clone(&shared), succeed()),
        WorkerPool::new(
            pool_config("hot", 8, 3).with_poll_interval(Duration::from_millis(1)),
            Arc::clone(&shared),
            succeed(),
        ),
    ]);
    pools.start().unwrap();

    let done = eventually(Duration::from_secs(10), || async {
        count(&store, JobStatus::Completed).await == 100
    })
    .await;
    assert!(done, "every job should complete");

    let coordinator = ShutdownCoordinator::new(Duration::from_secs(2));
    assert_eq!(pools.shutdown(&coordinator).await, ShutdownOutcome::Drained);

    let jobs = store.snapshot().await;
    assert_eq!(jobs.iter().map(|j| j.attempts).sum::<u32>(), 100);
    for job in &jobs {
        let worker = job.worker_id.as_deref().unwrap();
        assert!(worker.starts_with("standard-") || worker.starts_with("hot-"));
    }
}

#[tokio::test]
async fn test_store_outage_does_not_stop_workers() {
    let store = MemoryJobStore::arc();
    store.set_unavailable(true);

    let mut pool = WorkerPool::new(pool_config("standard", 2, 3), store.clone(), succeed());
    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.set_unavailable(false);
    store.enqueue(NewJob::new(json!({}))).await.unwrap();

    let done = eventually(Duration::from_secs(5), || async {
        count(&store, JobStatus::Completed).await == 1
    })
    .await;
    assert!(done, "workers should resume once the store is back");
    assert_eq!(
        pool.shutdown(Duration::from_secs(2)).await.unwrap(),
        ShutdownOutcome::Drained
    );
}
