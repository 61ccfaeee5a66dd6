//! Persistent scan storage.
//!
//! - **ScanStore**: SQLite database of one row per target, pre-created
//!   incomplete and updated in batches by the single writer
//! - **ResultSink / StoreConnector**: the writer-facing seam over the store
//!
//! # Usage
//!
//! ```rust,ignore
//! use parascan::storage::ScanStore;
//!
//! let store = ScanStore::open(Path::new("out/parascan.db"), 1).await?;
//! store.initialize().await?;
//! store.precreate(&jobs).await?;
//! let pending = store.incomplete_targets().await?;
//! store.checkpoint_and_close().await?;
//! ```

pub mod database;
pub mod schema;
pub mod sink;

pub use database::{BatchReport, ScanStore, StoreCounts, StoreError, StoredRecord, SCAN_CONFIG_KEY};
pub use sink::{ResultSink, SqliteConnector, StoreConnector};
