//! SQLite scan store.
//!
//! Opened in write-ahead-log mode with `synchronous = NORMAL`. The runner uses
//! it to seed rows and read progress; during a run only the
//! [`DbWriter`](crate::scheduler::DbWriter) writes to it, over a single
//! connection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use super::schema;
use crate::scheduler::job::{Artifact, Job, JobResult};

/// Key under which the run configuration is stored.
pub const SCAN_CONFIG_KEY: &str = "scan_config";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or connection failure.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Artifact or option (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error around the database file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one batch transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows updated and marked complete.
    pub written: u64,
    /// Targets with no pre-created row. Their results were dropped.
    pub missing: Vec<String>,
}

/// Row counts by completion state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub total: u64,
    pub complete: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl StoreCounts {
    pub fn incomplete(&self) -> u64 {
        self.total.saturating_sub(self.complete)
    }
}

/// One row of `scan_results`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub target: String,
    pub artifact: Option<Artifact>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub worker_id: Option<usize>,
    pub retry_count: u32,
    pub processing_ms: u64,
    pub complete: bool,
    pub updated_at: Option<String>,
}

impl StoredRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, StoreError> {
        let artifact = row
            .get::<Option<Vec<u8>>, _>("artifact")
            .map(|bytes| Artifact::from_bytes(&bytes))
            .transpose()?;

        Ok(Self {
            id: row.get("id"),
            target: row.get("target"),
            artifact,
            success: row.get::<Option<i64>, _>("success").map(|v| v != 0),
            error: row.get("error"),
            worker_id: row.get::<Option<i64>, _>("worker_id").map(|v| v as usize),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            processing_ms: row.get::<i64, _>("processing_ms") as u64,
            complete: row.get::<i64, _>("complete") != 0,
            updated_at: row.get("updated_at"),
        })
    }
}

/// SQLite-backed result store.
#[derive(Clone)]
pub struct ScanStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl ScanStore {
    /// Opens (creating if missing) the database at `path`.
    ///
    /// The writer opens with `max_connections = 1` so at most one write
    /// transaction can be in flight.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;

        tracing::debug!(path = %path.display(), max_connections, "Scan store opened");
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Returns the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates tables and indexes if they do not exist.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        for statement in schema::all_schema_statements() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Inserts an incomplete row per job. Existing targets are left alone.
    ///
    /// Returns the number of rows created.
    pub async fn precreate(&self, jobs: &[Job]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut created = 0;
        for job in jobs {
            created += sqlx::query(schema::INSERT_PENDING)
                .bind(job.target())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        tracing::debug!(requested = jobs.len(), created, "Pre-created result rows");
        Ok(created)
    }

    /// Writes a batch of results in one transaction.
    ///
    /// Each result updates the row for its target and marks it complete.
    /// Updating the same target twice leaves the row as the last write set it.
    pub async fn apply_batch(&self, results: &[JobResult]) -> Result<BatchReport, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut report = BatchReport::default();

        for result in results {
            let artifact = result.artifact.as_ref().map(Artifact::to_bytes).transpose()?;
            let affected = sqlx::query(schema::UPDATE_RESULT)
                .bind(artifact)
                .bind(result.success as i64)
                .bind(&result.error)
                .bind(result.worker_id as i64)
                .bind(result.retry_count as i64)
                .bind(result.processing_time.as_millis() as i64)
                .bind(result.completed_at.to_rfc3339())
                .bind(result.target())
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if affected == 0 {
                report.missing.push(result.target().to_string());
            } else {
                report.written += affected;
            }
        }

        tx.commit().await?;
        Ok(report)
    }

    /// Targets whose rows are still incomplete, in insertion order.
    pub async fn incomplete_targets(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(schema::SELECT_INCOMPLETE)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Job::new(row.get::<String, _>("target")))
            .collect())
    }

    /// Every completed row, in insertion order.
    pub async fn completed_records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let rows = sqlx::query(schema::SELECT_COMPLETE)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(StoredRecord::from_row).collect()
    }

    /// The row for one target, if any.
    pub async fn record(&self, target: &str) -> Result<Option<StoredRecord>, StoreError> {
        let row = sqlx::query(schema::SELECT_BY_TARGET)
            .bind(target)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(StoredRecord::from_row).transpose()
    }

    pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let row = sqlx::query(schema::SELECT_COUNTS)
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreCounts {
            total: row.get::<i64, _>("total") as u64,
            complete: row.get::<i64, _>("complete") as u64,
            succeeded: row.get::<i64, _>("succeeded") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }

    /// Stores the run options so a resumed run can report them.
    pub async fn save_options<T: Serialize>(&self, options: &T) -> Result<(), StoreError> {
        let value = serde_json::to_string(options)?;
        sqlx::query(schema::UPSERT_OPTION)
            .bind(SCAN_CONFIG_KEY)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Loads the options saved by [`save_options`](Self::save_options).
    pub async fn load_options<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let row = sqlx::query(schema::SELECT_OPTION)
            .bind(SCAN_CONFIG_KEY)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("value"))?)),
            None => Ok(None),
        }
    }

    /// Checkpoints the write-ahead log and closes every connection.
    pub async fn checkpoint_and_close(&self) -> Result<(), StoreError> {
        let checkpoint = sqlx::query(schema::CHECKPOINT_TRUNCATE)
            .execute(&self.pool)
            .await;
        self.pool.close().await;
        checkpoint?;

        tracing::debug!(path = %self.path.display(), "Scan store checkpointed and closed");
        Ok(())
    }
}
