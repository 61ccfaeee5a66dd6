//! Isolated scan worker.
//!
//! Each worker owns one scan session and one private profile directory. It
//! pulls jobs until it receives a sentinel or the run is cancelled, retries
//! failed jobs according to the [`RetryTable`], and reports every finished
//! job to the writer and a metrics snapshot to the pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{Artifact, Job, JobResult};
use super::queue::{Envelope, JobQueue, MetricsChannel, ResultQueue};
use super::retry::{classify, RetryTable};
use crate::metrics::{ScanRecorder, WorkerMetrics};
use crate::session::{ScanSession, SessionConfig, SessionError, SessionFactory};

/// Prefix of every worker profile directory.
pub const PROFILE_DIR_PREFIX: &str = "parascan_worker_";

/// Profile directory of worker `worker_id` under `root`.
pub fn profile_dir_for(root: &Path, worker_id: usize) -> PathBuf {
    root.join(format!("{PROFILE_DIR_PREFIX}{worker_id}"))
}

/// Removes a profile directory and everything in it. Missing is fine.
pub fn wipe_profile_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "Failed to remove profile directory");
        }
    }
}

fn reset_profile_dir(dir: &Path) {
    wipe_profile_dir(dir);
    if let Err(e) = fs::create_dir_all(dir) {
        warn!(path = %dir.display(), error = %e, "Failed to create profile directory");
    }
}

/// Everything a worker shares with the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub job_queue: JobQueue,
    pub result_queue: ResultQueue,
    pub metrics_channel: MetricsChannel,
    pub cancel: CancellationToken,
    pub factory: Arc<dyn SessionFactory>,
    pub session_config: SessionConfig,
    pub retry_table: RetryTable,
    pub profile_root: PathBuf,
    /// How long one dequeue waits before re-checking cancellation.
    pub poll_interval: Duration,
    /// Budget for one scan attempt.
    pub job_timeout: Duration,
    /// How long a finished result may wait for queue room once the run is cancelled.
    pub result_grace: Duration,
}

/// A worker bound to one session and one profile directory.
pub struct IsolatedWorker {
    id: usize,
    ctx: WorkerContext,
    profile_dir: PathBuf,
    session: Option<Box<dyn ScanSession>>,
    metrics: WorkerMetrics,
    recorder: ScanRecorder,
}

impl IsolatedWorker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        let profile_dir = profile_dir_for(&ctx.profile_root, id);
        Self {
            id,
            ctx,
            profile_dir,
            session: None,
            metrics: WorkerMetrics::new(id),
            recorder: ScanRecorder::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Runs the job loop to completion and returns the final metrics.
    pub async fn run(mut self) -> WorkerMetrics {
        info!(worker_id = self.id, profile = %self.profile_dir.display(), "Worker started");
        self.setup().await;

        loop {
            if self.ctx.cancel.is_cancelled() {
                info!(worker_id = self.id, "Worker received cancellation");
                break;
            }

            match self.ctx.job_queue.pop(self.ctx.poll_interval).await {
                Ok(Some(Envelope::Item(job))) => self.handle_job(job).await,
                Ok(Some(Envelope::Stop)) => {
                    debug!(worker_id = self.id, "Worker received sentinel");
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "Job queue closed");
                    break;
                }
            }
        }

        self.teardown().await;
        self.send_metrics();
        info!(
            worker_id = self.id,
            processed = self.metrics.jobs_processed,
            succeeded = self.metrics.jobs_succeeded,
            failed = self.metrics.jobs_failed,
            "Worker stopped"
        );
        self.metrics
    }

    async fn setup(&mut self) {
        reset_profile_dir(&self.profile_dir);
        if let Err(e) = self.ensure_session().await {
            // Jobs still flow; every attempt retries creation and reports it
            error!(worker_id = self.id, error = %e, "Session creation failed at startup");
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown().await;
        }
        wipe_profile_dir(&self.profile_dir);
    }

    async fn handle_job(&mut self, job: Job) {
        info!(worker_id = self.id, target = %job, "Processing job");
        self.recorder.job_started();
        let result = self.process_with_retry(job).await;
        self.recorder.job_finished();
        self.recorder.record_job(
            result.success,
            result.error_class,
            result.processing_time.as_secs_f64(),
        );

        if result.success {
            info!(
                worker_id = self.id,
                target = %result.job,
                duration_ms = result.processing_time.as_millis() as u64,
                retries = result.retry_count,
                "Job completed"
            );
        } else {
            warn!(
                worker_id = self.id,
                target = %result.job,
                error = result.error.as_deref().unwrap_or_default(),
                error_class = ?result.error_class,
                retries = result.retry_count,
                "Job failed"
            );
        }

        self.metrics.record(&result);
        self.send_result(result).await;
        self.send_metrics();
    }

    /// Runs one job, retrying classified failures.
    ///
    /// Never fails: exhausted retries produce a failed [`JobResult`] carrying
    /// the last error. Backoff sleeps are not interrupted by cancellation, but
    /// a job whose backoff ends after cancellation is not attempted again; it
    /// is reported as failed with the error that triggered the backoff.
    pub async fn process_with_retry(&mut self, job: Job) -> JobResult {
        let started = Instant::now();
        let mut retry_count = 0;

        loop {
            let error = match self.attempt(&job).await {
                Ok(artifact) => {
                    return JobResult::from_artifact(
                        job,
                        artifact,
                        self.id,
                        started.elapsed(),
                        retry_count,
                    );
                }
                Err(e) => e.to_string(),
            };

            let class = classify(&error);
            let policy = self.ctx.retry_table.policy(class).clone();
            if !policy.allows_retry(retry_count) {
                return JobResult::failure(job, error, class, self.id, started.elapsed(), retry_count);
            }

            let delay = policy.backoff_for(retry_count);
            warn!(
                worker_id = self.id,
                target = %job,
                error_class = %class,
                attempt = retry_count + 1,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Scan failed, retrying"
            );
            self.recorder.record_retry(class);
            tokio::time::sleep(delay).await;

            if self.ctx.cancel.is_cancelled() {
                info!(
                    worker_id = self.id,
                    target = %job,
                    retries = retry_count,
                    "Cancelled during backoff, reporting last error"
                );
                return JobResult::failure(job, error, class, self.id, started.elapsed(), retry_count);
            }
            retry_count += 1;

            if policy.rebuild_session {
                self.rebuild_session().await;
            }
        }
    }

    async fn attempt(&mut self, job: &Job) -> Result<Artifact, SessionError> {
        self.ensure_session().await?;
        let timeout = self.ctx.job_timeout;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SessionError::Crashed("no active session".to_string()))?;

        match tokio::time::timeout(timeout, session.execute(job)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SessionError::Timeout(timeout)),
        }
    }

    async fn ensure_session(&mut self) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = self
            .ctx
            .factory
            .create_session(self.id, &self.profile_dir, &self.ctx.session_config)
            .await?;
        debug!(worker_id = self.id, "Session created");
        self.session = Some(session);
        Ok(())
    }

    async fn rebuild_session(&mut self) {
        info!(worker_id = self.id, "Rebuilding session");
        if let Some(mut session) = self.session.take() {
            session.teardown().await;
        }
        reset_profile_dir(&self.profile_dir);
        self.metrics.record_session_restart();
        self.recorder.record_session_restart();

        if let Err(e) = self.ensure_session().await {
            warn!(worker_id = self.id, error = %e, "Session rebuild failed");
        }
    }

    async fn send_result(&mut self, result: JobResult) {
        let target = result.job.clone();
        let sent = tokio::select! {
            biased;
            sent = self.ctx.result_queue.push(result.clone()) => sent,
            _ = self.ctx.cancel.cancelled() => {
                debug!(worker_id = self.id, target = %target, "Cancelled with result queue full, waiting for room");
                self.ctx
                    .result_queue
                    .push_timeout(Envelope::Item(result), self.ctx.result_grace)
                    .await
            }
        };
        if let Err(e) = sent {
            error!(worker_id = self.id, target = %target, error = %e, "Result dropped");
        }
    }

    fn send_metrics(&self) {
        if let Err(e) = self.ctx.metrics_channel.try_push(self.metrics.clone()) {
            debug!(worker_id = self.id, error = %e, "Metrics snapshot dropped");
        }
    }
}
