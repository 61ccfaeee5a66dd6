//! Worker pool manager.
//!
//! Owns the queues, the worker tasks and the single writer task for one run.
//!
//! Lifecycle: `Idle -> Seeding -> Running -> Draining -> Terminated`.
//!
//! - `start` seeds every job followed by one sentinel per worker, spawns the
//!   writer, then spawns workers with a staggered delay
//! - `wait_for_completion` supervises the writer, samples memory pressure and
//!   finalizes metrics once every worker has exited
//! - `shutdown` cancels, joins (then aborts) workers, stops the writer and
//!   discards unstarted jobs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use super::job::Job;
use super::queue::{BoundedQueue, Envelope, JobQueue, MetricsChannel, QueueError, ResultQueue};
use super::retry::RetryTable;
use super::worker::{profile_dir_for, wipe_profile_dir, IsolatedWorker, WorkerContext};
use super::writer::{DbWriter, WriterConfig, WriterStats};
use crate::logging::worker_dispatch;
use crate::metrics::{MetricsCollector, ScanRecorder, ScanSummary, WorkerMetrics};
use crate::resources::ResourceMonitor;
use crate::session::{SessionConfig, SessionFactory};
use crate::storage::{StoreConnector, StoreError};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `start` was called twice.
    #[error("Pool already started")]
    AlreadyStarted,

    /// The pool has not been started.
    #[error("Pool is not running")]
    NotRunning,

    /// Filesystem error while preparing the run.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer could not reach the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A queue rejected a message.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// A task did not finish in time.
    #[error("Timed out joining {task} after {timeout:?}")]
    JoinTimeout { task: String, timeout: Duration },
}

/// Lifecycle state of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Seeding,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PoolState::Idle => "idle",
            PoolState::Seeding => "seeding",
            PoolState::Running => "running",
            PoolState::Draining => "draining",
            PoolState::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Delay between two worker spawns.
///
/// Small pools start quickly; larger pools are spread out so session
/// startups do not all compete at once.
pub fn stagger_delay(num_workers: usize) -> Duration {
    match num_workers {
        0..=3 => Duration::from_millis(500),
        4..=5 => Duration::from_millis(1000),
        _ => Duration::from_millis(1500),
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn (clamped to the job count).
    pub num_workers: usize,
    /// Run output directory. Worker logs and failed-target files go here.
    pub output_dir: PathBuf,
    /// Parent of the per-worker profile directories.
    pub profile_root: PathBuf,
    /// How long workers and the pool wait per poll.
    pub poll_interval: Duration,
    /// Budget for one scan attempt.
    pub job_timeout: Duration,
    pub retry_table: RetryTable,
    pub session: SessionConfig,
    pub writer: WriterConfig,
    /// Result queue capacity. Workers wait when it is full.
    pub result_queue_capacity: usize,
    /// Spread worker spawns using [`stagger_delay`].
    pub stagger: bool,
    /// Per-worker join budget during a graceful shutdown.
    pub graceful_join_timeout: Duration,
    /// Writer join budget during shutdown.
    pub writer_shutdown_timeout: Duration,
    /// Writer join budget after all workers finished.
    pub drain_timeout: Duration,
    /// Writer restarts allowed after unexpected exits.
    pub writer_max_restarts: u32,
    /// How often memory pressure is sampled while waiting.
    pub memory_check_interval: Duration,
    /// Per-worker log files at this level. `OFF` disables them.
    pub worker_log_level: LevelFilter,
    /// Print the summary to stdout when the run finalizes.
    pub print_summary: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            output_dir: PathBuf::from("parascan_output"),
            profile_root: std::env::temp_dir(),
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(120),
            retry_table: RetryTable::default(),
            session: SessionConfig::default(),
            writer: WriterConfig::default(),
            result_queue_capacity: 256,
            stagger: true,
            graceful_join_timeout: Duration::from_secs(10),
            writer_shutdown_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            writer_max_restarts: 3,
            memory_check_interval: Duration::from_secs(30),
            worker_log_level: LevelFilter::INFO,
            print_summary: true,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_profile_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_root = dir.into();
        self
    }

    /// Sets the poll interval of workers, writer and pool alike.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.writer.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_retry_table(mut self, table: RetryTable) -> Self {
        self.retry_table = table;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_stagger(mut self, stagger: bool) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_graceful_join_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_join_timeout = timeout;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_writer_max_restarts(mut self, restarts: u32) -> Self {
        self.writer_max_restarts = restarts;
        self
    }

    pub fn with_worker_log_level(mut self, level: LevelFilter) -> Self {
        self.worker_log_level = level;
        self
    }

    pub fn with_print_summary(mut self, print: bool) -> Self {
        self.print_summary = print;
        self
    }

    /// Directory holding the per-worker log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }
}

struct WorkerHandle {
    id: usize,
    handle: JoinHandle<WorkerMetrics>,
}

struct PoolChannels {
    jobs: JobQueue,
    results: ResultQueue,
    metrics: MetricsChannel,
}

/// Manages the workers and the writer of one scan run.
pub struct WorkerPoolManager {
    config: WorkerPoolConfig,
    factory: Arc<dyn SessionFactory>,
    connector: Arc<dyn StoreConnector>,
    monitor: ResourceMonitor,
    cancel: CancellationToken,
    state: PoolState,
    started: bool,
    channels: Option<PoolChannels>,
    workers: Vec<WorkerHandle>,
    writer: Option<JoinHandle<Result<WriterStats, StoreError>>>,
    writer_restarts: u32,
    writer_stats: WriterStats,
    collector: Option<MetricsCollector>,
    summary: Option<ScanSummary>,
    failed_jobs_path: Option<PathBuf>,
    last_memory_check: Option<Instant>,
    recorder: ScanRecorder,
}

impl WorkerPoolManager {
    pub fn new(
        config: WorkerPoolConfig,
        factory: Arc<dyn SessionFactory>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            config,
            factory,
            connector,
            monitor: ResourceMonitor::default(),
            cancel: CancellationToken::new(),
            state: PoolState::Idle,
            started: false,
            channels: None,
            workers: Vec::new(),
            writer: None,
            writer_restarts: 0,
            writer_stats: WriterStats::default(),
            collector: None,
            summary: None,
            failed_jobs_path: None,
            last_memory_check: None,
            recorder: ScanRecorder::new(),
        }
    }

    /// Uses `monitor` for memory-pressure sampling.
    pub fn with_monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Number of workers spawned (0 before `start`).
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Token cancelled by `shutdown`. Cancelling it directly stops workers
    /// after their in-flight job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Summary built when the run finalized.
    pub fn summary(&self) -> Option<&ScanSummary> {
        self.summary.as_ref()
    }

    /// Writer counters accumulated across restarts.
    pub fn writer_stats(&self) -> WriterStats {
        self.writer_stats
    }

    /// Times the writer was restarted after an unexpected exit.
    pub fn writer_restarts(&self) -> u32 {
        self.writer_restarts
    }

    /// Path of the failed-targets file, if one was written.
    pub fn failed_jobs_path(&self) -> Option<&PathBuf> {
        self.failed_jobs_path.as_ref()
    }

    /// Seeds the job queue and spawns the writer and the workers.
    ///
    /// If a worker cannot be spawned, everything already running is stopped
    /// with a forced shutdown before the error is returned.
    pub async fn start(&mut self, jobs: Vec<Job>) -> Result<(), PoolError> {
        if self.started {
            return Err(PoolError::AlreadyStarted);
        }
        self.started = true;
        if jobs.is_empty() {
            info!("No targets to process");
            return Ok(());
        }

        self.state = PoolState::Seeding;
        std::fs::create_dir_all(self.config.logs_dir())?;

        let num_workers = self.config.num_workers.clamp(1, jobs.len());
        let total = jobs.len();
        let channels = PoolChannels {
            jobs: BoundedQueue::new("jobs", total + num_workers),
            results: BoundedQueue::new("results", self.config.result_queue_capacity),
            metrics: BoundedQueue::new("metrics", total + num_workers),
        };

        for job in jobs {
            channels.jobs.try_push(job)?;
        }
        channels.jobs.push_stops(num_workers)?;
        self.recorder.set_queue_depth(channels.jobs.name(), total);

        self.collector = Some(MetricsCollector::new(total, Some(self.config.output_dir.clone())));
        self.channels = Some(channels);
        self.spawn_writer();

        let delay = stagger_delay(num_workers);
        for id in 0..num_workers {
            if self.cancel.is_cancelled() {
                warn!(spawned = id, "Cancelled during startup, not spawning remaining workers");
                break;
            }
            if let Err(e) = self.spawn_worker(id) {
                error!(worker_id = id, error = %e, "Worker spawn failed, stopping pool");
                if let Err(stop) = self.shutdown(false).await {
                    warn!(error = %stop, "Shutdown after failed start reported an error");
                }
                return Err(e);
            }
            if self.config.stagger && id + 1 < num_workers {
                tokio::time::sleep(delay).await;
            }
        }

        self.recorder.set_active_workers(self.workers.len());
        self.state = PoolState::Running;
        info!(
            jobs = total,
            workers = self.workers.len(),
            stagger_ms = delay.as_millis() as u64,
            "Worker pool started"
        );
        Ok(())
    }

    fn spawn_worker(&mut self, id: usize) -> Result<(), PoolError> {
        let channels = self.channels.as_ref().ok_or(PoolError::NotRunning)?;
        let ctx = WorkerContext {
            job_queue: channels.jobs.clone(),
            result_queue: channels.results.clone(),
            metrics_channel: channels.metrics.clone(),
            cancel: self.cancel.clone(),
            factory: Arc::clone(&self.factory),
            session_config: self.config.session.clone(),
            retry_table: self.config.retry_table.clone(),
            profile_root: self.config.profile_root.clone(),
            poll_interval: self.config.poll_interval,
            job_timeout: self.config.job_timeout,
            result_grace: self.config.graceful_join_timeout,
        };
        let worker = IsolatedWorker::new(id, ctx);

        let handle = if self.config.worker_log_level == LevelFilter::OFF {
            tokio::spawn(worker.run())
        } else {
            let dispatch = worker_dispatch(&self.config.logs_dir(), id, self.config.worker_log_level)?;
            tokio::spawn(worker.run().with_subscriber(dispatch))
        };

        debug!(worker_id = id, "Worker spawned");
        self.workers.push(WorkerHandle { id, handle });
        Ok(())
    }

    fn spawn_writer(&mut self) {
        let Some(channels) = self.channels.as_ref() else {
            return;
        };
        let writer = DbWriter::new(
            self.config.writer.clone(),
            channels.results.clone(),
            Arc::clone(&self.connector),
        );
        self.writer = Some(tokio::spawn(writer.run()));
    }

    /// Waits for every worker to exit, then drains the writer and finalizes metrics.
    ///
    /// Returns `Ok(false)` if `timeout` elapses or the run is cancelled first.
    /// The writer join is bounded by what is left of `timeout`, or by
    /// `drain_timeout` without one.
    ///
    /// Dropping the future part way leaves every task handle registered, so a
    /// following [`shutdown`](Self::shutdown) still joins them.
    pub async fn wait_for_completion(&mut self, timeout: Option<Duration>) -> Result<bool, PoolError> {
        match self.state {
            _ if !self.started => return Err(PoolError::NotRunning),
            PoolState::Terminated => return Ok(true),
            // Started with no jobs
            PoolState::Idle => return Ok(true),
            PoolState::Running => {}
            PoolState::Seeding | PoolState::Draining => return Err(PoolError::NotRunning),
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // Workers also exit on cancellation, so it is checked first
            if self.cancel.is_cancelled() {
                info!("Wait interrupted by cancellation");
                return Ok(false);
            }
            if self.workers.iter().all(|w| w.handle.is_finished()) {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("Timed out waiting for workers");
                return Ok(false);
            }

            self.supervise_writer().await;
            self.sample_progress();

            let mut pause = self.config.poll_interval;
            if let Some(d) = deadline {
                pause = pause.min(d.saturating_duration_since(Instant::now()));
            }
            tokio::time::sleep(pause).await;
        }

        self.state = PoolState::Draining;
        self.reap_workers().await;
        // A writer that died with the last results still queued gets one more run
        self.supervise_writer().await;
        let writer_budget = match deadline.map(|d| d.saturating_duration_since(Instant::now())) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => self.config.drain_timeout,
        };
        self.stop_writer(writer_budget).await;
        self.finalize();
        self.state = PoolState::Terminated;
        Ok(true)
    }

    /// Stops the run.
    ///
    /// A graceful shutdown lets each worker finish its in-flight job within
    /// the join budget; anything still alive afterwards is aborted. Calling
    /// it again is a no-op.
    pub async fn shutdown(&mut self, graceful: bool) -> Result<(), PoolError> {
        if self.state == PoolState::Terminated {
            return Ok(());
        }
        info!(graceful, state = %self.state, "Shutting down worker pool");
        self.cancel.cancel();

        if self.channels.is_none() {
            self.state = PoolState::Terminated;
            return Ok(());
        }
        self.state = PoolState::Draining;

        // Workers get the join budget concurrently, not one after another
        let budget = if graceful {
            self.config.graceful_join_timeout
        } else {
            Duration::ZERO
        };
        let joins = std::mem::take(&mut self.workers).into_iter().map(|mut worker| async move {
            let outcome =
                join_with_timeout(&mut worker.handle, budget, format!("worker {}", worker.id)).await;
            (worker, outcome)
        });

        for (worker, outcome) in futures::future::join_all(joins).await {
            match outcome {
                Ok(Ok(metrics)) => self.absorb_metrics(metrics),
                Ok(Err(e)) => error!(worker_id = worker.id, error = %e, "Worker task failed"),
                Err(e) => {
                    warn!(worker_id = worker.id, error = %e, "Force-terminating worker");
                    worker.handle.abort();
                    let _ = worker.handle.await;
                    wipe_profile_dir(&profile_dir_for(&self.config.profile_root, worker.id));
                }
            }
        }
        self.recorder.set_active_workers(0);

        self.stop_writer(self.config.writer_shutdown_timeout).await;

        if let Some(channels) = self.channels.as_ref() {
            let discarded = channels.jobs.drain();
            if !discarded.is_empty() {
                info!(discarded = discarded.len(), "Discarded unstarted jobs");
            }
            self.recorder.set_queue_depth(channels.jobs.name(), 0);
        }

        self.finalize();
        self.state = PoolState::Terminated;
        Ok(())
    }

    /// Restarts the writer if it ended while workers are still running.
    async fn supervise_writer(&mut self) {
        let finished = self.writer.as_ref().is_some_and(|h| h.is_finished());
        if !finished {
            return;
        }
        let Some(handle) = self.writer.take() else {
            return;
        };

        match handle.await {
            Ok(Ok(stats)) => {
                self.writer_stats.merge(&stats);
                warn!("Writer exited before the run finished");
            }
            Ok(Err(e)) => error!(error = %e, "Writer failed"),
            Err(e) => error!(error = %e, "Writer task panicked"),
        }

        if self.writer_restarts < self.config.writer_max_restarts {
            self.writer_restarts += 1;
            warn!(
                restart = self.writer_restarts,
                max = self.config.writer_max_restarts,
                "Restarting writer"
            );
            self.spawn_writer();
        } else {
            error!("Writer restart limit reached, cancelling run");
            self.cancel.cancel();
        }
    }

    fn sample_progress(&mut self) {
        if let Some(channels) = self.channels.as_ref() {
            self.recorder.set_queue_depth(channels.jobs.name(), channels.jobs.len());
            self.recorder
                .set_queue_depth(channels.results.name(), channels.results.len());
        }
        let alive = self.workers.iter().filter(|w| !w.handle.is_finished()).count();
        self.recorder.set_active_workers(alive);

        let due = self
            .last_memory_check
            .map_or(true, |t| t.elapsed() >= self.config.memory_check_interval);
        if !due {
            return;
        }
        self.last_memory_check = Some(Instant::now());

        self.drain_metrics_channel();
        if let Some(collector) = self.collector.as_ref() {
            let summary = collector.summary();
            info!(
                processed = summary.processed,
                total = summary.total,
                failed = summary.failed,
                workers = alive,
                "Progress"
            );
        }

        if let Some(recommended) = self.monitor.should_reduce_workers(alive) {
            warn!(
                current = alive,
                recommended,
                limit_percent = self.monitor.memory_limit_percent(),
                "Memory pressure high, consider fewer workers"
            );
            self.recorder.set_recommended_workers(recommended);
        }
    }

    async fn reap_workers(&mut self) {
        while let Some(worker) = self.workers.last_mut() {
            let joined = (&mut worker.handle).await;
            let id = worker.id;
            self.workers.pop();
            match joined {
                Ok(metrics) => self.absorb_metrics(metrics),
                Err(e) => error!(worker_id = id, error = %e, "Worker task panicked"),
            }
        }
        self.recorder.set_active_workers(0);
    }

    /// Sends the writer its sentinel and joins it, aborting after `timeout`.
    ///
    /// The handle stays in `self.writer` until the join settles.
    async fn stop_writer(&mut self, timeout: Duration) {
        if self.writer.is_none() {
            return;
        }

        if let Some(channels) = self.channels.as_ref() {
            if let Err(e) = channels.results.push_timeout(Envelope::Stop, timeout).await {
                warn!(error = %e, "Could not deliver writer sentinel");
            }
        }

        let outcome = match self.writer.as_mut() {
            Some(handle) => join_with_timeout(handle, timeout, "writer".to_string()).await,
            None => return,
        };
        let Some(handle) = self.writer.take() else {
            return;
        };

        match outcome {
            Ok(Ok(Ok(stats))) => self.writer_stats.merge(&stats),
            Ok(Ok(Err(e))) => error!(error = %e, "Writer failed"),
            Ok(Err(e)) => error!(error = %e, "Writer task panicked"),
            Err(e) => {
                warn!(error = %e, "Force-terminating writer");
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    /// Records a joined worker's final metrics. Queued snapshots are older, so
    /// they are drained first.
    fn absorb_metrics(&mut self, metrics: WorkerMetrics) {
        self.drain_metrics_channel();
        if let Some(collector) = self.collector.as_mut() {
            collector.add_worker_metrics(metrics);
        }
    }

    fn drain_metrics_channel(&mut self) {
        let Some(channels) = self.channels.as_ref() else {
            return;
        };
        let snapshots = channels.metrics.drain();
        if let Some(collector) = self.collector.as_mut() {
            for snapshot in snapshots {
                collector.add_worker_metrics(snapshot);
            }
        }
    }

    /// Aggregates metrics, prints the summary and writes failed-target files. Runs once.
    fn finalize(&mut self) {
        if self.summary.is_some() {
            return;
        }
        self.drain_metrics_channel();
        let Some(collector) = self.collector.as_ref() else {
            return;
        };

        let summary = collector.summary();
        if self.config.print_summary {
            collector.print_summary();
        }
        match collector.save_failed_jobs(None) {
            Ok(Some(path)) => {
                info!(path = %path.display(), failed = summary.failed, "Failed targets saved");
                self.failed_jobs_path = Some(path);
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Failed to save failed targets"),
        }

        info!(
            processed = summary.processed,
            success = summary.success,
            failed = summary.failed,
            rows_written = self.writer_stats.written,
            "Scan finished"
        );
        self.summary = Some(summary);
    }
}

/// Awaits a task for at most `timeout` without consuming its handle.
async fn join_with_timeout<T>(
    handle: &mut JoinHandle<T>,
    timeout: Duration,
    task: String,
) -> Result<Result<T, tokio::task::JoinError>, PoolError> {
    tokio::time::timeout(timeout, handle)
        .await
        .map_err(|_| PoolError::JoinTimeout { task, timeout })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stagger_delay_is_monotonic() {
        assert_eq!(stagger_delay(1), Duration::from_millis(500));
        assert_eq!(stagger_delay(3), Duration::from_millis(500));
        assert_eq!(stagger_delay(4), Duration::from_millis(1000));
        assert_eq!(stagger_delay(5), Duration::from_millis(1000));
        assert_eq!(stagger_delay(6), Duration::from_millis(1500));
        for n in 1..32 {
            assert!(stagger_delay(n) <= stagger_delay(n + 1));
        }
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.graceful_join_timeout, Duration::from_secs(10));
        assert_eq!(config.writer_shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.writer_max_restarts, 3);
        assert_eq!(config.writer.batch_size, 10);
        assert!(config.stagger);
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(2)
            .with_output_dir("/out")
            .with_poll_interval(Duration::from_millis(50))
            .with_stagger(false)
            .with_worker_log_level(LevelFilter::OFF);
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.logs_dir(), PathBuf::from("/out/logs"));
        assert_eq!(config.writer.poll_interval, Duration::from_millis(50));
        assert!(!config.stagger);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::JoinTimeout {
            task: "writer".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Timed out joining writer after 5s");
        assert_eq!(PoolError::AlreadyStarted.to_string(), "Pool already started");
        assert_eq!(PoolState::Draining.to_string(), "draining");
    }

    #[tokio::test]
    async fn test_empty_start_stays_idle() {
        let mut pool = WorkerPoolManager::new(
            WorkerPoolConfig::new(2),
            Arc::new(crate::session::HttpProbeFactory::new()),
            Arc::new(crate::storage::SqliteConnector::new("unused.db")),
        );
        assert!(matches!(
            pool.wait_for_completion(None).await,
            Err(PoolError::NotRunning)
        ));

        pool.start(Vec::new()).await.unwrap();
        assert_eq!(pool.state(), PoolState::Idle);
        assert_eq!(pool.num_workers(), 0);
        assert!(pool.wait_for_completion(None).await.unwrap());
        assert!(matches!(
            pool.start(vec![Job::new("a")]).await,
            Err(PoolError::AlreadyStarted)
        ));

        pool.shutdown(true).await.unwrap();
        pool.shutdown(true).await.unwrap();
        assert_eq!(pool.state(), PoolState::Terminated);
        assert!(pool.summary().is_none());
    }
}
