//! The single database writer.
//!
//! Exactly one `DbWriter` task owns the store connection during a run. It
//! drains the result queue, buffers results and commits them in batches, so
//! at most one write transaction is ever in flight.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::job::JobResult;
use super::queue::{Envelope, ResultQueue};
use crate::metrics::ScanRecorder;
use crate::storage::{ResultSink, StoreConnector, StoreError};

/// Configuration for the writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Results per transaction.
    pub batch_size: usize,
    /// Longest a non-empty buffer waits before a time-based flush.
    pub flush_interval: Duration,
    /// How long one dequeue waits before checking the flush timer.
    pub poll_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WriterConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Counters reported by a writer when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Rows committed.
    pub written: u64,
    /// Results dropped because no row matched their target.
    pub dropped: u64,
    /// Committed transactions.
    pub flushes: u64,
    /// Transactions that failed and kept their buffer.
    pub failed_flushes: u64,
}

impl WriterStats {
    /// Adds another writer's counters (used across writer restarts).
    pub fn merge(&mut self, other: &WriterStats) {
        self.written += other.written;
        self.dropped += other.dropped;
        self.flushes += other.flushes;
        self.failed_flushes += other.failed_flushes;
    }
}

/// Drains the result queue into the store.
pub struct DbWriter {
    config: WriterConfig,
    result_queue: ResultQueue,
    connector: Arc<dyn StoreConnector>,
    buffer: Vec<JobResult>,
    last_flush: Instant,
    stats: WriterStats,
    recorder: ScanRecorder,
}

impl DbWriter {
    pub fn new(
        config: WriterConfig,
        result_queue: ResultQueue,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            config: WriterConfig {
                batch_size,
                ..config
            },
            result_queue,
            connector,
            buffer: Vec::with_capacity(batch_size),
            last_flush: Instant::now(),
            stats: WriterStats::default(),
            recorder: ScanRecorder::new(),
        }
    }

    /// Runs until a sentinel arrives or every producer is gone.
    ///
    /// Fails only if the store cannot be opened.
    pub async fn run(mut self) -> Result<WriterStats, StoreError> {
        let mut sink = self.connector.connect().await?;
        info!(batch_size = self.config.batch_size, "Writer started");

        loop {
            match self.result_queue.pop(self.config.poll_interval).await {
                Ok(Some(Envelope::Item(result))) => {
                    self.buffer.push(result);
                    if self.buffer.len() >= self.config.batch_size || self.flush_due() {
                        self.flush(sink.as_mut()).await;
                    }
                }
                Ok(Some(Envelope::Stop)) => {
                    debug!("Writer received sentinel");
                    break;
                }
                Ok(None) => {
                    if !self.buffer.is_empty() && self.flush_due() {
                        self.flush(sink.as_mut()).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Result queue closed");
                    break;
                }
            }
        }

        self.flush(sink.as_mut()).await;
        if !self.buffer.is_empty() {
            error!(lost = self.buffer.len(), "Final flush failed, results not persisted");
        }
        if let Err(e) = sink.close().await {
            warn!(error = %e, "Store checkpoint failed on close");
        }

        info!(
            written = self.stats.written,
            dropped = self.stats.dropped,
            flushes = self.stats.flushes,
            failed_flushes = self.stats.failed_flushes,
            "Writer stopped"
        );
        Ok(self.stats)
    }

    fn flush_due(&self) -> bool {
        self.last_flush.elapsed() >= self.config.flush_interval
    }

    /// Commits the buffer in one transaction. On failure the buffer is kept.
    async fn flush(&mut self, sink: &mut dyn ResultSink) {
        self.last_flush = Instant::now();
        if self.buffer.is_empty() {
            return;
        }

        match sink.apply_batch(&self.buffer).await {
            Ok(report) => {
                for target in &report.missing {
                    warn!(target = %target, "No row for target, result dropped");
                }
                let missing = report.missing.len() as u64;
                self.stats.written += report.written;
                self.stats.dropped += missing;
                self.stats.flushes += 1;
                self.recorder.record_flush(true, report.written, missing);
                debug!(rows = self.buffer.len(), "Batch committed");
                self.buffer.clear();
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                self.recorder.record_flush(false, 0, 0);
                warn!(error = %e, buffered = self.buffer.len(), "Batch commit failed, keeping buffer");
            }
        }
    }
}
