//! parascan: parallel scan orchestration.
//!
//! Fans a large target list out to a bounded pool of isolated workers, retries
//! failures by error class, and persists every result through a single
//! database writer so an interrupted run can be resumed.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod resources;
pub mod scheduler;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::ScanConfig;
pub use error::{ConfigError, PoolError, QueueError, SessionError, StoreError, TargetError};
pub use pipeline::{run_parallel_scan, ScanInput, ScanOutcome};
pub use scheduler::{ErrorClass, Job, JobResult, WorkerPoolConfig, WorkerPoolManager};
