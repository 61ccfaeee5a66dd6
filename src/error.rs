//! Error types shared across the crate.
//!
//! Subsystem errors live next to their subsystem and are re-exported here:
//! - Configuration loading and validation
//! - Target list loading
//! - Queue, pool, store and session failures

use std::path::PathBuf;

use thiserror::Error;

pub use crate::scheduler::{PoolError, QueueError};
pub use crate::session::SessionError;
pub use crate::storage::StoreError;

/// Errors that can occur while building a [`ScanConfig`](crate::config::ScanConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable or field has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The YAML file could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while loading targets.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The target file could not be read.
    #[error("Cannot read target file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Nothing to scan after filtering blank and comment lines.
    #[error("No targets found in {0}")]
    Empty(PathBuf),
}
