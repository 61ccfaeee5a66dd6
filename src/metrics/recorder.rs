//! Recording helpers over the Prometheus statics.
//!
//! Every call is a no-op until [`init_metrics`](super::init_metrics) has run,
//! so library users and tests that never initialize metrics pay nothing.

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH, RECOMMENDED_WORKERS,
    RETRIES_TOTAL, ROWS_MISSING, ROWS_WRITTEN, SESSION_RESTARTS, WRITER_FLUSHES,
};
use crate::scheduler::retry::ErrorClass;

/// Records live scan metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanRecorder;

impl ScanRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Records a finished job.
    pub fn record_job(&self, success: bool, error_class: Option<ErrorClass>, duration_secs: f64) {
        let status = if success { "success" } else { "failure" };
        let class = error_class.map(|c| c.as_str()).unwrap_or("none");

        if let Some(counter) = JOBS_TOTAL.get() {
            counter.with_label_values(&[status, class]).inc();
        }
        if let Some(histogram) = JOB_DURATION.get() {
            histogram.with_label_values(&[status]).observe(duration_secs);
        }

        tracing::trace!(status, error_class = class, duration_secs, "Recorded job");
    }

    /// Records one retry of a job.
    pub fn record_retry(&self, error_class: ErrorClass) {
        if let Some(counter) = RETRIES_TOTAL.get() {
            counter.with_label_values(&[error_class.as_str()]).inc();
        }
    }

    /// Records a session teardown-and-recreate.
    pub fn record_session_restart(&self) {
        if let Some(counter) = SESSION_RESTARTS.get() {
            counter.inc();
        }
    }

    /// Sets the depth gauge of a queue.
    pub fn set_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.with_label_values(&[queue_name]).set(depth as f64);
        }
    }

    pub fn job_started(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    pub fn job_finished(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.dec();
        }
    }

    /// Sets the number of live workers.
    pub fn set_active_workers(&self, count: usize) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.set(count as f64);
        }
    }

    pub fn set_recommended_workers(&self, count: usize) {
        if let Some(gauge) = RECOMMENDED_WORKERS.get() {
            gauge.set(count as f64);
        }
    }

    /// Records a writer flush: rows committed and rows with no matching target.
    pub fn record_flush(&self, committed: bool, written: u64, missing: u64) {
        let outcome = if committed { "committed" } else { "failed" };
        if let Some(counter) = WRITER_FLUSHES.get() {
            counter.with_label_values(&[outcome]).inc();
        }
        if committed {
            if let Some(counter) = ROWS_WRITTEN.get() {
                counter.inc_by(written);
            }
            if let Some(counter) = ROWS_MISSING.get() {
                counter.inc_by(missing);
            }
        }

        tracing::trace!(outcome, written, missing, "Recorded writer flush");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_recorder_updates_registry() {
        let _ = init_metrics();
        let recorder = ScanRecorder::new();

        recorder.record_job(false, Some(ErrorClass::SslError), 1.5);
        recorder.record_retry(ErrorClass::SslError);
        recorder.record_flush(true, 10, 1);
        recorder.set_queue_depth("recorder_test", 4);

        let text = export_metrics();
        assert!(text.contains("parascan_retries_total{error_class=\"ssl_error\"}"));
        assert!(text.contains("parascan_queue_depth{queue_name=\"recorder_test\"} 4"));
        assert!(text.contains("parascan_writer_flushes_total{outcome=\"committed\"}"));
    }

    #[test]
    fn test_recorder_without_init_is_noop() {
        // Must not panic whether or not another test initialized the registry
        let recorder = ScanRecorder::default();
        recorder.job_started();
        recorder.job_finished();
        recorder.set_active_workers(2);
        recorder.set_recommended_workers(1);
        recorder.record_session_restart();
    }
}
