//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by hookline and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Serializes `init_metrics` so all statics come from one registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all hookline metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Number of jobs per status, as last read by the metrics reporter.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Worker loops between claim and finalization, labeled by pool.
pub static ACTIVE_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// Claim attempts, labeled by pool and result (claimed/empty/error).
pub static CLAIMS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Finalized attempts, labeled by pool and outcome.
pub static JOBS_FINALIZED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Handler execution duration in seconds, labeled by pool.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Jobs reclaimed by the reaper, labeled by action (requeued/dead_lettered).
pub static STALE_RECLAIMED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Completed jobs per minute since the reporter started.
pub static THROUGHPUT_PER_MIN: OnceLock<Gauge> = OnceLock::new();

/// completed / (completed + failed) * 100.
pub static SUCCESS_RATE_PERCENT: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are no-ops.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("hookline_queue_depth", "Number of jobs per status"),
        &["status"],
    )?;

    let active_workers = GaugeVec::new(
        Opts::new(
            "hookline_active_workers",
            "Worker loops currently holding a claimed job",
        ),
        &["pool"],
    )?;

    // Worker metrics
    let claims_total = CounterVec::new(
        Opts::new("hookline_claims_total", "Claim attempts by result"),
        &["pool", "result"],
    )?;

    let jobs_finalized_total = CounterVec::new(
        Opts::new("hookline_jobs_finalized_total", "Finalized attempts by outcome"),
        &["pool", "outcome"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "hookline_job_duration_seconds",
            "Handler execution duration in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["pool"],
    )?;

    let stale_reclaimed_total = CounterVec::new(
        Opts::new(
            "hookline_stale_reclaimed_total",
            "Jobs reclaimed after their processing lease expired",
        ),
        &["action"],
    )?;

    // Snapshot mirrors
    let throughput_per_min = Gauge::new(
        "hookline_throughput_per_minute",
        "Completed jobs per minute since the reporter started",
    )?;

    let success_rate_percent = Gauge::new(
        "hookline_success_rate_percent",
        "Completed share of terminal jobs, in percent",
    )?;

    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(claims_total.clone()))?;
    registry.register(Box::new(jobs_finalized_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(stale_reclaimed_total.clone()))?;
    registry.register(Box::new(throughput_per_min.clone()))?;
    registry.register(Box::new(success_rate_percent.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = CLAIMS_TOTAL.set(claims_total);
    let _ = JOBS_FINALIZED_TOTAL.set(jobs_finalized_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = STALE_RECLAIMED_TOTAL.set(stale_reclaimed_total);
    let _ = THROUGHPUT_PER_MIN.set(throughput_per_min);
    let _ = SUCCESS_RATE_PERCENT.set(success_rate_percent);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
