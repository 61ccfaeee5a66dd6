//! Prometheus metrics registration and export.
//!
//! Defines the live metrics of a scan run and provides functions for
//! initializing the registry and exporting it in text format.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all parascan metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished jobs, labeled by status and error class.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job wall time in seconds including backoff, labeled by status.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Retries performed, labeled by error class.
pub static RETRIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Scan sessions torn down and recreated after a driver crash.
pub static SESSION_RESTARTS: OnceLock<Counter> = OnceLock::new();

/// Messages waiting in a queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Jobs currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Worker tasks currently alive.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Rows committed by the writer.
pub static ROWS_WRITTEN: OnceLock<IntCounter> = OnceLock::new();

/// Results dropped by the writer because no row matched the target.
pub static ROWS_MISSING: OnceLock<IntCounter> = OnceLock::new();

/// Writer flushes, labeled by outcome (committed/failed).
pub static WRITER_FLUSHES: OnceLock<IntCounterVec> = OnceLock::new();

/// Last worker count recommended by the resource monitor.
pub static RECOMMENDED_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless: the first registry wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is invalid.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("parascan_jobs_total", "Total number of finished scan jobs"),
        &["status", "error_class"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new(
            "parascan_job_duration_seconds",
            "Scan job wall time in seconds, backoff included",
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["status"],
    )?;

    let retries_total = IntCounterVec::new(
        Opts::new("parascan_retries_total", "Retries performed by error class"),
        &["error_class"],
    )?;

    let session_restarts = Counter::new(
        "parascan_session_restarts_total",
        "Scan sessions recreated after a crash",
    )?;

    // Queue and worker metrics
    let queue_depth = GaugeVec::new(
        Opts::new("parascan_queue_depth", "Messages waiting in a queue"),
        &["queue_name"],
    )?;

    let jobs_in_progress = Gauge::new(
        "parascan_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    let active_workers = Gauge::new("parascan_active_workers", "Number of active workers")?;

    let recommended_workers = Gauge::new(
        "parascan_recommended_workers",
        "Worker count recommended by the resource monitor",
    )?;

    // Writer metrics
    let rows_written = IntCounter::new("parascan_rows_written_total", "Rows committed")?;

    let rows_missing = IntCounter::new(
        "parascan_rows_missing_total",
        "Results dropped because no row matched the target",
    )?;

    let writer_flushes = IntCounterVec::new(
        Opts::new("parascan_writer_flushes_total", "Writer flushes by outcome"),
        &["outcome"],
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(retries_total.clone()))?;
    registry.register(Box::new(session_restarts.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(recommended_workers.clone()))?;
    registry.register(Box::new(rows_written.clone()))?;
    registry.register(Box::new(rows_missing.clone()))?;
    registry.register(Box::new(writer_flushes.clone()))?;

    // Already set means an earlier call won
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = RETRIES_TOTAL.set(retries_total);
    let _ = SESSION_RESTARTS.set(session_restarts);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = RECOMMENDED_WORKERS.set(recommended_workers);
    let _ = ROWS_WRITTEN.set(rows_written);
    let _ = ROWS_MISSING.set(rows_missing);
    let _ = WRITER_FLUSHES.set(writer_flushes);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry is not
/// initialized or encoding fails.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        let _ = init_metrics();
        if let Some(c) = JOBS_TOTAL.get() {
            c.with_label_values(&["failure", "timeout"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("parascan_jobs_total"));
    }
}
