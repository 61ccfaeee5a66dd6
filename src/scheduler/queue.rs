//! Bounded in-process queues between the pool, the workers and the writer.
//!
//! Every queue is a multi-producer/multi-consumer flume channel carrying
//! [`Envelope`]s. A [`Envelope::Stop`] is a sentinel: each consumer takes
//! exactly one and exits, so the producer pushes one sentinel per consumer.
//!
//! - `JobQueue`: jobs from the pool to the workers
//! - `ResultQueue`: finished results from the workers to the writer
//! - `MetricsChannel`: per-worker metric snapshots to the pool

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::job::{Job, JobResult};
use crate::metrics::WorkerMetrics;

/// Errors that can occur during queue operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("Queue '{0}' is full")]
    Full(&'static str),

    /// Every receiver or sender has been dropped.
    #[error("Queue '{0}' is disconnected")]
    Disconnected(&'static str),

    /// A send did not complete in time.
    #[error("Send to queue '{name}' timed out after {timeout:?}")]
    SendTimeout {
        name: &'static str,
        timeout: Duration,
    },
}

/// A queue message: a work item or a termination sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    /// A unit of work.
    Item(T),
    /// No more work; the consumer should exit its loop.
    Stop,
}

/// A bounded MPMC queue with sentinel support.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    tx: flume::Sender<Envelope<T>>,
    rx: flume::Receiver<Envelope<T>>,
}

/// Jobs waiting for a worker.
pub type JobQueue = BoundedQueue<Job>;
/// Results waiting for the writer.
pub type ResultQueue = BoundedQueue<JobResult>;
/// Worker metric snapshots waiting for the collector.
pub type MetricsChannel = BoundedQueue<WorkerMetrics>;

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            capacity: self.capacity,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.rx.len())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` messages (minimum 1).
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self {
            name,
            capacity,
            tx,
            rx,
        }
    }

    /// Returns the queue name used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages currently queued, sentinels included.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Enqueues an item without waiting.
    pub fn try_push(&self, item: T) -> Result<(), QueueError> {
        self.try_send(Envelope::Item(item))
    }

    /// Enqueues a sentinel without waiting.
    pub fn try_push_stop(&self) -> Result<(), QueueError> {
        self.try_send(Envelope::Stop)
    }

    /// Enqueues `count` sentinels without waiting.
    pub fn push_stops(&self, count: usize) -> Result<(), QueueError> {
        for _ in 0..count {
            self.try_push_stop()?;
        }
        Ok(())
    }

    /// Enqueues an item, waiting for room if the queue is full.
    pub async fn push(&self, item: T) -> Result<(), QueueError> {
        self.tx
            .send_async(Envelope::Item(item))
            .await
            .map_err(|_| QueueError::Disconnected(self.name))
    }

    /// Enqueues a message, giving up after `timeout`.
    pub async fn push_timeout(
        &self,
        message: Envelope<T>,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        match tokio::time::timeout(timeout, self.tx.send_async(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(QueueError::Disconnected(self.name)),
            Err(_) => Err(QueueError::SendTimeout {
                name: self.name,
                timeout,
            }),
        }
    }

    /// Waits up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when the wait timed out with nothing queued.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<Envelope<T>>, QueueError> {
        match tokio::time::timeout(timeout, self.rx.recv_async()).await {
            Ok(Ok(message)) => Ok(Some(message)),
            Ok(Err(_)) => Err(QueueError::Disconnected(self.name)),
            Err(_) => Ok(None),
        }
    }

    /// Takes the next message if one is immediately available.
    pub fn try_pop(&self) -> Option<Envelope<T>> {
        self.rx.try_recv().ok()
    }

    /// Removes everything queued and returns the items; sentinels are dropped.
    pub fn drain(&self) -> Vec<T> {
        self.rx
            .drain()
            .filter_map(|message| match message {
                Envelope::Item(item) => Some(item),
                Envelope::Stop => None,
            })
            .collect()
    }

    fn try_send(&self, message: Envelope<T>) -> Result<(), QueueError> {
        self.tx.try_send(message).map_err(|e| match e {
            flume::TrySendError::Full(_) => QueueError::Full(self.name),
            flume::TrySendError::Disconnected(_) => QueueError::Disconnected(self.name),
        })
    }
}
