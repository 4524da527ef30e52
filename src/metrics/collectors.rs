//! Metric recording helpers for queue operations.
//!
//! `QueueMetrics` wraps the raw Prometheus statics with consistent labels.
//! Every method is a no-op until `init_metrics()` has run, so library users
//! and tests never have to initialise metrics.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_WORKERS, CLAIMS_TOTAL, JOBS_FINALIZED_TOTAL, JOB_DURATION, QUEUE_DEPTH,
    STALE_RECLAIMED_TOTAL, SUCCESS_RATE_PERCENT, THROUGHPUT_PER_MIN,
};
use super::reporter::MetricsSnapshot;
use crate::scheduler::job::{JobStatus, ReclaimReport};

/// Result label for a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    Empty,
    Error,
}

impl ClaimResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimResult::Claimed => "claimed",
            ClaimResult::Empty => "empty",
            ClaimResult::Error => "error",
        }
    }
}

/// Metrics collector for queue and worker events.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Record one claim attempt of a pool.
    pub fn record_claim(&self, pool: &str, result: ClaimResult) {
        if let Some(claims) = CLAIMS_TOTAL.get() {
            claims.with_label_values(&[pool, result.as_str()]).inc();
        }
    }

    /// Record a finalized attempt and the time the handler took.
    ///
    /// # Arguments
    ///
    /// * `pool` - Pool the worker belongs to
    /// * `outcome` - Outcome label (e.g., "completed", "retry", "dead_letter")
    /// * `duration` - Handler execution time, timeouts included
    pub fn record_outcome(&self, pool: &str, outcome: &str, duration: Duration) {
        if let Some(finalized) = JOBS_FINALIZED_TOTAL.get() {
            finalized.with_label_values(&[pool, outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[pool])
                .observe(duration.as_secs_f64());
        }

        tracing::trace!(
            pool = pool,
            outcome = outcome,
            duration_ms = duration.as_millis() as u64,
            "Recorded job outcome metric"
        );
    }

    /// Set the number of busy worker loops of a pool.
    pub fn set_active_workers(&self, pool: &str, active: usize) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.with_label_values(&[pool]).set(active as f64);
        }
    }

    /// Record the jobs a reaper sweep touched.
    pub fn record_reclaim(&self, report: &ReclaimReport) {
        if let Some(reclaimed) = STALE_RECLAIMED_TOTAL.get() {
            reclaimed
                .with_label_values(&["requeued"])
                .inc_by(report.requeued.len() as f64);
            reclaimed
                .with_label_values(&["dead_lettered"])
                .inc_by(report.dead_lettered.len() as f64);
        }
    }

    /// Mirror a reporter snapshot into gauges.
    pub fn record_snapshot(&self, snapshot: &MetricsSnapshot) {
        if let Some(depth) = QUEUE_DEPTH.get() {
            for status in JobStatus::ALL {
                depth
                    .with_label_values(&[status.as_str()])
                    .set(snapshot.count(status) as f64);
            }
        }

        if let Some(throughput) = THROUGHPUT_PER_MIN.get() {
            throughput.set(snapshot.throughput_per_min);
        }

        if let Some(rate) = SUCCESS_RATE_PERCENT.get() {
            rate.set(snapshot.success_rate_percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::prometheus::{export_metrics, init_metrics};

    #[test]
    fn test_claim_result_labels() {
        assert_eq!(ClaimResult::Claimed.as_str(), "claimed");
        assert_eq!(ClaimResult::Empty.as_str(), "empty");
        assert_eq!(ClaimResult::Error.as_str(), "error");
    }

    #[test]
    fn test_collector_records_into_registry() {
        let _ = init_metrics();
        let metrics = QueueMetrics::new();

        metrics.record_claim("collector-test", ClaimResult::Claimed);
        metrics.record_outcome("collector-test", "completed", Duration::from_millis(40));
        metrics.set_active_workers("collector-test", 2);
        metrics.record_reclaim(&ReclaimReport::default());

        let exported = export_metrics();
        assert!(exported.contains("hookline_claims_total"));
        assert!(exported.contains("collector-test"));
        assert!(exported.contains("hookline_job_duration_seconds"));
    }
}
