//! Per-worker metrics and the end-of-run aggregation.
//!
//! Each worker owns a [`WorkerMetrics`] and is the only writer to it. The pool
//! drains worker snapshots into a [`MetricsCollector`] once the workers have
//! exited, builds a [`ScanSummary`] and writes the failed-targets files used
//! to resubmit failures.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::scheduler::job::{truncate, Job, JobResult};
use crate::scheduler::retry::{classify, ErrorClass};

/// Default file name for the resubmission list.
pub const FAILED_TARGETS_FILE: &str = "failed_targets.txt";

/// Longest failure reason kept per failed job.
const REASON_LIMIT: usize = 100;

/// A job that ended in failure, with the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    /// The failed job.
    pub job: Job,
    /// Short error description.
    pub reason: String,
    /// Classification of the error.
    pub error_class: ErrorClass,
}

/// Counters owned and mutated by one worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub worker_id: usize,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub total_time: Duration,
    pub avg_time: Duration,
    pub session_restarts: u64,
    pub errors_by_type: BTreeMap<ErrorClass, u64>,
    pub failed_jobs: Vec<FailedJob>,
}

impl WorkerMetrics {
    /// Creates empty metrics for a worker.
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    /// Folds one finished job into the counters.
    pub fn record(&mut self, result: &JobResult) {
        self.jobs_processed += 1;
        self.total_time += result.processing_time;

        if result.success {
            self.jobs_succeeded += 1;
        } else {
            self.jobs_failed += 1;
            let error_class = result
                .error_class
                .unwrap_or_else(|| classify(result.error.as_deref().unwrap_or_default()));
            *self.errors_by_type.entry(error_class).or_insert(0) += 1;

            let reason = match result.error.as_deref() {
                Some(error) if !error.is_empty() => truncate(error, REASON_LIMIT),
                _ => error_class.to_string(),
            };
            self.failed_jobs.push(FailedJob {
                job: result.job.clone(),
                reason,
                error_class,
            });
        }

        self.avg_time = Duration::from_secs_f64(
            self.total_time.as_secs_f64() / self.jobs_processed as f64,
        );
    }

    /// Counts a session teardown-and-recreate.
    pub fn record_session_restart(&mut self) {
        self.session_restarts += 1;
    }
}

/// Aggregated view of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total: usize,
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    /// Percentage of processed jobs that succeeded.
    pub success_rate: f64,
    pub elapsed_secs: f64,
    /// Processed jobs per second.
    pub throughput: f64,
    pub errors_by_type: BTreeMap<ErrorClass, u64>,
    pub workers_used: usize,
    pub session_restarts: u64,
    /// Mean of the per-worker average job latency.
    pub avg_latency_ms: f64,
}

/// Collects worker metrics after a run and reports on them.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    total_jobs: usize,
    output_dir: Option<PathBuf>,
    started: Instant,
    workers: BTreeMap<usize, WorkerMetrics>,
}

impl MetricsCollector {
    /// Creates a collector for a run of `total_jobs` jobs started now.
    pub fn new(total_jobs: usize, output_dir: Option<PathBuf>) -> Self {
        Self {
            total_jobs,
            output_dir,
            started: Instant::now(),
            workers: BTreeMap::new(),
        }
    }

    /// Uses `started` as the run start for elapsed time and throughput.
    pub fn with_start(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    /// Adds a worker snapshot. A later snapshot for the same worker replaces the earlier one.
    pub fn add_worker_metrics(&mut self, metrics: WorkerMetrics) {
        self.workers.insert(metrics.worker_id, metrics);
    }

    /// Returns the number of workers that reported.
    pub fn workers_reported(&self) -> usize {
        self.workers.len()
    }

    /// Every failed job across all workers, ordered by worker id.
    pub fn failed_jobs(&self) -> Vec<&FailedJob> {
        self.workers
            .values()
            .flat_map(|m| m.failed_jobs.iter())
            .collect()
    }

    /// Builds the run summary.
    pub fn summary(&self) -> ScanSummary {
        let processed: u64 = self.workers.values().map(|m| m.jobs_processed).sum();
        let success: u64 = self.workers.values().map(|m| m.jobs_succeeded).sum();
        let failed: u64 = self.workers.values().map(|m| m.jobs_failed).sum();
        let session_restarts = self.workers.values().map(|m| m.session_restarts).sum();
        let elapsed_secs = self.started.elapsed().as_secs_f64();

        let mut errors_by_type = BTreeMap::new();
        for metrics in self.workers.values() {
            for (class, count) in &metrics.errors_by_type {
                *errors_by_type.entry(*class).or_insert(0) += count;
            }
        }

        let avg_latency_ms = if self.workers.is_empty() {
            0.0
        } else {
            self.workers
                .values()
                .map(|m| m.avg_time.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / self.workers.len() as f64
        };

        ScanSummary {
            total: self.total_jobs,
            processed,
            success,
            failed,
            success_rate: if processed > 0 {
                success as f64 / processed as f64 * 100.0
            } else {
                0.0
            },
            elapsed_secs,
            throughput: if elapsed_secs > 0.0 {
                processed as f64 / elapsed_secs
            } else {
                0.0
            },
            errors_by_type,
            workers_used: self.workers.len(),
            session_restarts,
            avg_latency_ms,
        }
    }

    /// Renders the summary block printed at the end of a run.
    pub fn render_summary(&self) -> String {
        let summary = self.summary();
        let rule = "=".repeat(70);
        let mut out = String::new();

        let _ = writeln!(out, "\n{rule}");
        let _ = writeln!(out, "                    SCAN SUMMARY");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total targets:       {}", summary.total);
        let _ = writeln!(out, "Processed:           {}", summary.processed);
        let _ = writeln!(
            out,
            "Successful:          {} ({:.1}%)",
            summary.success, summary.success_rate
        );
        let _ = writeln!(out, "Failed:              {}", summary.failed);
        let _ = writeln!(out, "Total time:          {:.1} seconds", summary.elapsed_secs);
        let _ = writeln!(out, "Throughput:          {:.2} targets/second", summary.throughput);
        let _ = writeln!(out, "Workers used:        {}", summary.workers_used);
        let _ = writeln!(out, "Session restarts:    {}", summary.session_restarts);
        let _ = writeln!(out, "Avg time/target:     {:.0} ms", summary.avg_latency_ms);

        if !summary.errors_by_type.is_empty() {
            let mut errors: Vec<_> = summary.errors_by_type.iter().collect();
            errors.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            let _ = writeln!(out, "\nErrors by type:");
            for (class, count) in errors {
                let _ = writeln!(out, "  - {class}: {count}");
            }
        }

        let _ = writeln!(out, "{rule}");
        out
    }

    /// Prints the summary to stdout.
    pub fn print_summary(&self) {
        print!("{}", self.render_summary());
    }

    /// Writes the failed-targets files.
    ///
    /// The main file lists one target per line so it can be fed straight
    /// back in as a target list. A `_detailed` companion adds the failure
    /// reasons. Returns `Ok(None)` when no job failed.
    pub fn save_failed_jobs(&self, path: Option<&Path>) -> io::Result<Option<PathBuf>> {
        let failed = self.failed_jobs();
        if failed.is_empty() {
            return Ok(None);
        }

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match &self.output_dir {
                Some(dir) => dir.join(FAILED_TARGETS_FILE),
                None => PathBuf::from(FAILED_TARGETS_FILE),
            },
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut plain = String::new();
        for entry in &failed {
            let _ = writeln!(plain, "{}", entry.job);
        }
        fs::write(&path, plain)?;

        let mut detailed = String::new();
        let _ = writeln!(detailed, "# Failed targets with error reasons");
        let _ = writeln!(
            detailed,
            "# Generated: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(detailed, "# Total failed: {}\n", failed.len());
        for entry in &failed {
            let _ = writeln!(detailed, "{}", entry.job);
            let _ = writeln!(
                detailed,
                "  # Error ({}): {}\n",
                entry.error_class, entry.reason
            );
        }
        fs::write(detailed_path(&path), detailed)?;

        Ok(Some(path))
    }
}

/// Path of the detailed companion to a failed-targets file.
pub fn detailed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "failed_targets".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}_detailed.{}", ext.to_string_lossy()),
        None => format!("{stem}_detailed"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::Artifact;

    fn ok(target: &str, worker_id: usize, ms: u64) -> JobResult {
        JobResult::from_artifact(
            Job::new(target),
            Artifact::new(serde_json::Value::Null),
            worker_id,
            Duration::from_millis(ms),
            0,
        )
    }

    fn failed(target: &str, worker_id: usize, error: &str, class: ErrorClass) -> JobResult {
        JobResult::failure(
            Job::new(target),
            error,
            class,
            worker_id,
            Duration::from_millis(100),
            1,
        )
    }

    #[test]
    fn test_worker_metrics_record() {
        let mut metrics = WorkerMetrics::new(2);
        metrics.record(&ok("a", 2, 100));
        metrics.record(&ok("b", 2, 300));
        metrics.record(&failed("c", 2, "Connection refused", ErrorClass::ConnectionRefused));

        assert_eq!(metrics.jobs_processed, 3);
        assert_eq!(metrics.jobs_succeeded, 2);
        assert_eq!(metrics.jobs_failed, 1);
        assert_eq!(metrics.total_time, Duration::from_millis(500));
        assert_eq!(metrics.avg_time.as_millis(), 166);
        assert_eq!(metrics.errors_by_type[&ErrorClass::ConnectionRefused], 1);
        assert_eq!(metrics.failed_jobs[0].job, Job::new("c"));
        assert_eq!(metrics.failed_jobs[0].reason, "Connection refused");
    }

    #[test]
    fn test_failure_without_text_uses_class_name() {
        let mut metrics = WorkerMetrics::new(0);
        let mut result = failed("x", 0, "", ErrorClass::Unknown);
        result.error = None;
        metrics.record(&result);
        assert_eq!(metrics.failed_jobs[0].reason, "unknown");
    }

    #[test]
    fn test_long_reason_is_truncated() {
        let mut metrics = WorkerMetrics::new(0);
        metrics.record(&failed("x", 0, &"e".repeat(300), ErrorClass::Unknown));
        assert_eq!(metrics.failed_jobs[0].reason.len(), REASON_LIMIT);
    }

    #[test]
    fn test_summary_aggregates_workers() {
        let mut w0 = WorkerMetrics::new(0);
        w0.record(&ok("a", 0, 100));
        w0.record(&failed("b", 0, "timed out", ErrorClass::Timeout));
        let mut w1 = WorkerMetrics::new(1);
        w1.record(&ok("c", 1, 300));
        w1.record(&failed("d", 1, "timed out", ErrorClass::Timeout));
        w1.record_session_restart();

        let mut collector = MetricsCollector::new(4, None);
        collector.add_worker_metrics(w0);
        collector.add_worker_metrics(w1);

        let summary = collector.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed, 2);
        assert!((summary.success_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(summary.errors_by_type[&ErrorClass::Timeout], 2);
        assert_eq!(summary.workers_used, 2);
        assert_eq!(summary.session_restarts, 1);
        // (100ms + 200ms) / 2 workers
        assert!((summary.avg_latency_ms - 150.0).abs() < 1.0);
    }

    #[test]
    fn test_later_snapshot_replaces_earlier() {
        let mut collector = MetricsCollector::new(2, None);
        let mut snapshot = WorkerMetrics::new(0);
        snapshot.record(&ok("a", 0, 10));
        collector.add_worker_metrics(snapshot.clone());
        snapshot.record(&ok("b", 0, 10));
        collector.add_worker_metrics(snapshot);

        assert_eq!(collector.workers_reported(), 1);
        assert_eq!(collector.summary().processed, 2);
    }

    #[test]
    fn test_empty_summary() {
        let collector = MetricsCollector::new(0, None);
        let summary = collector.summary();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert!(collector.render_summary().contains("SCAN SUMMARY"));
    }

    #[test]
    fn test_render_lists_errors_by_count() {
        let mut w0 = WorkerMetrics::new(0);
        w0.record(&failed("a", 0, "ssl", ErrorClass::SslError));
        w0.record(&failed("b", 0, "timed out", ErrorClass::Timeout));
        w0.record(&failed("c", 0, "timed out", ErrorClass::Timeout));
        let mut collector = MetricsCollector::new(3, None);
        collector.add_worker_metrics(w0);

        let text = collector.render_summary();
        let timeout_at = text.find("- timeout: 2").unwrap();
        let ssl_at = text.find("- ssl_error: 1").unwrap();
        assert!(timeout_at < ssl_at);
    }

    #[test]
    fn test_save_failed_jobs_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut w0 = WorkerMetrics::new(0);
        w0.record(&ok("a", 0, 10));
        w0.record(&failed("b", 0, "Connection refused", ErrorClass::ConnectionRefused));
        let mut collector = MetricsCollector::new(2, Some(dir.path().to_path_buf()));
        collector.add_worker_metrics(w0);

        let path = collector.save_failed_jobs(None).unwrap().unwrap();
        assert_eq!(path, dir.path().join(FAILED_TARGETS_FILE));
        assert_eq!(fs::read_to_string(&path).unwrap(), "b\n");

        let detailed = fs::read_to_string(dir.path().join("failed_targets_detailed.txt")).unwrap();
        assert!(detailed.contains("# Total failed: 1"));
        assert!(detailed.contains("b\n  # Error (connection_refused): Connection refused"));
    }

    #[test]
    fn test_save_failed_jobs_none_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut w0 = WorkerMetrics::new(0);
        w0.record(&ok("a", 0, 10));
        let mut collector = MetricsCollector::new(1, Some(dir.path().to_path_buf()));
        collector.add_worker_metrics(w0);

        assert_eq!(collector.save_failed_jobs(None).unwrap(), None);
        assert!(!dir.path().join(FAILED_TARGETS_FILE).exists());
    }

    #[test]
    fn test_detailed_path() {
        assert_eq!(
            detailed_path(Path::new("/out/failed.txt")),
            PathBuf::from("/out/failed_detailed.txt")
        );
        assert_eq!(
            detailed_path(Path::new("retry")),
            PathBuf::from("retry_detailed")
        );
    }
}
