//! Scan runner.
//!
//! Drives one scan run end to end: resource precheck, store seeding (or
//! resume from incomplete rows), worker pool execution with Ctrl-C handling,
//! and the final store counts.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::targets::dedup_jobs;
use crate::config::ScanConfig;
use crate::metrics::{ScanRecorder, ScanSummary};
use crate::resources::{has_space, ResourceMonitor};
use crate::scheduler::{Job, WorkerPoolManager, WriterStats};
use crate::session::SessionFactory;
use crate::storage::{ScanStore, SqliteConnector, StoreCounts};

/// Where the jobs of a run come from.
#[derive(Debug, Clone)]
pub enum ScanInput {
    /// A fresh target list. Rows already present in the store are kept.
    Targets(Vec<Job>),
    /// Every incomplete row of an existing store.
    Resume,
}

/// Options persisted alongside the results of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub resumed: bool,
    pub config: ScanConfig,
}

/// Outcome of [`run_parallel_scan`].
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub run_id: Uuid,
    pub db_path: PathBuf,
    /// Jobs handed to the pool.
    pub scheduled: usize,
    /// Workers the pool ran with.
    pub workers: usize,
    /// True if the run was stopped before every job finished.
    pub interrupted: bool,
    pub summary: Option<ScanSummary>,
    /// Store counts after the run.
    pub counts: StoreCounts,
    pub failed_targets_path: Option<PathBuf>,
    pub writer: WriterStats,
}

impl ScanOutcome {
    /// True when every stored target has a result.
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.counts.incomplete() == 0
    }
}

/// Runs a scan, stopping gracefully on Ctrl-C.
pub async fn run_parallel_scan(
    config: &ScanConfig,
    input: ScanInput,
    factory: Arc<dyn SessionFactory>,
) -> anyhow::Result<ScanOutcome> {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    run_parallel_scan_until(config, input, factory, ctrl_c).await
}

/// Runs a scan, shutting the pool down gracefully when `interrupt` resolves first.
pub async fn run_parallel_scan_until<F>(
    config: &ScanConfig,
    input: ScanInput,
    factory: Arc<dyn SessionFactory>,
    interrupt: F,
) -> anyhow::Result<ScanOutcome>
where
    F: Future<Output = ()>,
{
    config.validate().context("Invalid scan configuration")?;
    let run_id = Uuid::new_v4();
    let monitor = ResourceMonitor::new(config.memory_limit_percent);

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {}", config.output_dir.display())
    })?;

    let disk = has_space(&config.output_dir, config.min_disk_gb);
    if !disk.has_space {
        warn!(
            available_gb = disk.available_gb,
            required_gb = config.min_disk_gb,
            "Low disk space in output directory"
        );
    }
    info!(run_id = %run_id, "{}", monitor.system_info());

    let db_path = config.db_path();
    let resumed = matches!(input, ScanInput::Resume);
    let jobs = seed_store(config, &db_path, input, run_id).await?;

    let requested = config.requested_workers();
    let sizing = monitor.recommend(requested, jobs.len());
    if sizing.workers != requested {
        info!(
            requested,
            workers = sizing.workers,
            limited_by = ?sizing.limited_by,
            "Adjusted worker count"
        );
    }
    ScanRecorder::new().set_recommended_workers(sizing.workers);

    let pool_config = config
        .pool_config(sizing.workers)
        .context("Invalid worker pool configuration")?;
    let connector = Arc::new(SqliteConnector::new(&db_path));
    let mut pool = WorkerPoolManager::new(pool_config, factory, connector).with_monitor(monitor);

    let scheduled = jobs.len();
    info!(run_id = %run_id, jobs = scheduled, resumed, "Starting scan");
    pool.start(jobs).await.context("Failed to start worker pool")?;
    let workers = pool.num_workers();

    // The interrupt only cancels; the wait itself always runs to completion
    let cancel = pool.cancellation_token();
    let finished = {
        let wait = pool.wait_for_completion(None);
        tokio::pin!(wait);
        tokio::pin!(interrupt);
        tokio::select! {
            result = &mut wait => result,
            _ = &mut interrupt => {
                warn!("Interrupt received, shutting down gracefully");
                cancel.cancel();
                wait.await
            }
        }
    }
    .context("Worker pool failed")?;

    if !finished {
        pool.shutdown(true).await.context("Worker pool shutdown failed")?;
        warn!(
            db = %db_path.display(),
            "Scan interrupted; run `parascan resume` to finish the remaining targets"
        );
    }

    let store = ScanStore::open(&db_path, 1)
        .await
        .context("Failed to reopen scan store")?;
    let counts = store.counts().await.context("Failed to count results")?;
    store
        .checkpoint_and_close()
        .await
        .context("Failed to close scan store")?;

    info!(
        run_id = %run_id,
        total = counts.total,
        complete = counts.complete,
        succeeded = counts.succeeded,
        failed = counts.failed,
        "Scan store updated"
    );

    Ok(ScanOutcome {
        run_id,
        db_path,
        scheduled,
        workers,
        interrupted: !finished,
        summary: pool.summary().cloned(),
        counts,
        failed_targets_path: pool.failed_jobs_path().cloned(),
        writer: pool.writer_stats(),
    })
}

/// Creates the store rows for a run and returns the jobs to schedule.
async fn seed_store(
    config: &ScanConfig,
    db_path: &std::path::Path,
    input: ScanInput,
    run_id: Uuid,
) -> anyhow::Result<Vec<Job>> {
    let store = ScanStore::open(db_path, 1)
        .await
        .with_context(|| format!("Failed to open scan store {}", db_path.display()))?;
    store.initialize().await.context("Failed to initialize scan store")?;

    let resumed = matches!(input, ScanInput::Resume);
    let jobs = match input {
        ScanInput::Targets(targets) => {
            let jobs = dedup_jobs(targets);
            let created = store
                .precreate(&jobs)
                .await
                .context("Failed to create result rows")?;
            if (created as usize) < jobs.len() {
                info!(
                    created,
                    existing = jobs.len() - created as usize,
                    "Some targets already had rows"
                );
            }
            jobs
        }
        ScanInput::Resume => {
            if let Ok(Some(previous)) = store.load_options::<RunOptions>().await {
                info!(
                    previous_run = %previous.run_id,
                    started_at = %previous.started_at,
                    "Resuming previous run"
                );
            }
            let jobs = store
                .incomplete_targets()
                .await
                .context("Failed to read incomplete targets")?;
            info!(remaining = jobs.len(), "Loaded incomplete targets");
            jobs
        }
    };

    let options = RunOptions {
        run_id,
        started_at: Utc::now(),
        resumed,
        config: config.clone(),
    };
    store
        .save_options(&options)
        .await
        .context("Failed to save run options")?;
    store
        .checkpoint_and_close()
        .await
        .context("Failed to close scan store")?;
    Ok(jobs)
}
