//! Metrics module for queue monitoring.
//!
//! Two complementary views:
//! - `MetricsReporter` periodically snapshots the store (counts per status,
//!   throughput, success rate) and logs the snapshot.
//! - Prometheus statics hold per-process counters (claims, outcomes, handler
//!   durations) plus gauges mirroring the latest snapshot.
//!
//! # Example
//!
//! ```ignore
//! use hookline::metrics::{init_metrics, export_metrics, MetricsReporter};
//!
//! init_metrics()?;
//! let reporter = MetricsReporter::new(store.clone(), Duration::from_secs(30));
//! let handle = reporter.spawn(stop_rx);
//!
//! // Prometheus text exposition
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;
pub mod reporter;

pub use collectors::{ClaimResult, QueueMetrics};
pub use prometheus::{export_metrics, init_metrics};
pub use reporter::{MetricsReporter, MetricsSnapshot};
