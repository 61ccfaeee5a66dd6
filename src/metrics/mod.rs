//! Run metrics.
//!
//! Two layers:
//!
//! - [`collectors`]: per-worker counters and the end-of-run aggregation into a
//!   [`ScanSummary`], plus the failed-targets files
//! - [`prometheus`] and [`recorder`]: live counters and gauges, exported in
//!   Prometheus text format
//!
//! # Example
//!
//! ```ignore
//! use parascan::metrics::{init_metrics, export_metrics, ScanRecorder};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! ScanRecorder::new().record_job(true, None, 2.5);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;
pub mod recorder;

pub use collectors::{
    detailed_path, FailedJob, MetricsCollector, ScanSummary, WorkerMetrics, FAILED_TARGETS_FILE,
};
pub use prometheus::{export_metrics, init_metrics, REGISTRY};
pub use recorder::ScanRecorder;
