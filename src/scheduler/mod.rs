//! Parallel scan scheduling: worker pool, retry policy and the single writer.
//!
//! - **JobQueue / ResultQueue / MetricsChannel**: bounded in-process queues with sentinels
//! - **IsolatedWorker**: one session and one profile directory per worker
//! - **DbWriter**: the only task that writes to the store
//! - **WorkerPoolManager**: sizing, seeding, staggered startup, completion and shutdown
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ Pool manager │
//!                      └──────┬───────┘
//!                             │ jobs + N sentinels
//!                      ┌──────▼───────┐
//!                      │   JobQueue   │
//!                      └──────┬───────┘
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 0│         │ Worker 1│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └───────────────────┼───────────────────┘
//!                      ┌──────▼───────┐
//!                      │ ResultQueue  │
//!                      └──────┬───────┘
//!                      ┌──────▼───────┐
//!                      │   DbWriter   │──► SQLite (WAL)
//!                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use parascan::scheduler::{WorkerPoolConfig, WorkerPoolManager, Job};
//! use parascan::session::HttpProbeFactory;
//! use parascan::storage::SqliteConnector;
//! use std::sync::Arc;
//!
//! let config = WorkerPoolConfig::new(4).with_output_dir("out");
//! let mut pool = WorkerPoolManager::new(
//!     config,
//!     Arc::new(HttpProbeFactory::new()),
//!     Arc::new(SqliteConnector::new("out/parascan.db")),
//! );
//! pool.start(vec![Job::new("https://example.com")]).await?;
//! if !pool.wait_for_completion(None).await? {
//!     pool.shutdown(true).await?;
//! }
//! ```

pub mod job;
pub mod queue;
pub mod retry;
pub mod worker;
pub mod worker_pool;
pub mod writer;

pub use job::{Artifact, Job, JobResult, ARTIFACT_SCHEMA_VERSION, SCAN_STAGES};
pub use queue::{BoundedQueue, Envelope, JobQueue, MetricsChannel, QueueError, ResultQueue};
pub use retry::{classify, ErrorClass, RetryPolicy, RetryTable};
pub use worker::{profile_dir_for, IsolatedWorker, WorkerContext};
pub use worker_pool::{stagger_delay, PoolError, PoolState, WorkerPoolConfig, WorkerPoolManager};
pub use writer::{DbWriter, WriterConfig, WriterStats};
