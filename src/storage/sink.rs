//! The writer's view of the store.
//!
//! The [`DbWriter`](crate::scheduler::DbWriter) only sees a [`ResultSink`]
//! obtained from a [`StoreConnector`], so it can be restarted on a fresh
//! connection and tested against an instrumented sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::database::{BatchReport, ScanStore, StoreError};
use crate::scheduler::job::JobResult;

/// A connection that accepts result batches.
#[async_trait]
pub trait ResultSink: Send {
    /// Applies a batch in one transaction.
    async fn apply_batch(&mut self, results: &[JobResult]) -> Result<BatchReport, StoreError>;

    /// Flushes durable state and releases the connection.
    async fn close(&mut self) -> Result<(), StoreError>;
}

/// Opens sinks for the writer.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ResultSink>, StoreError>;
}

#[async_trait]
impl ResultSink for ScanStore {
    async fn apply_batch(&mut self, results: &[JobResult]) -> Result<BatchReport, StoreError> {
        ScanStore::apply_batch(self, results).await
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.checkpoint_and_close().await
    }
}

/// Connects to a SQLite scan store over a single connection.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn connect(&self) -> Result<Box<dyn ResultSink>, StoreError> {
        let store = ScanStore::open(&self.path, 1).await?;
        store.initialize().await?;
        Ok(Box::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{Artifact, Job};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sqlite_connector_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.db");

        let seed = ScanStore::open(&path, 1).await.unwrap();
        seed.initialize().await.unwrap();
        seed.precreate(&[Job::new("a")]).await.unwrap();
        seed.checkpoint_and_close().await.unwrap();

        let mut sink = SqliteConnector::new(&path).connect().await.unwrap();
        let result = JobResult::from_artifact(
            Job::new("a"),
            Artifact::new(serde_json::Value::Null),
            0,
            Duration::from_millis(5),
            0,
        );
        let report = sink.apply_batch(&[result]).await.unwrap();
        assert_eq!(report.written, 1);
        sink.close().await.unwrap();

        let store = ScanStore::open(&path, 1).await.unwrap();
        assert_eq!(store.counts().await.unwrap().complete, 1);
    }
}
