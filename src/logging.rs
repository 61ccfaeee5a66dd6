//! Tracing setup.
//!
//! The binary installs one global subscriber. Each worker task runs under its
//! own dispatcher that writes to `<logs>/worker_<id>.log` and mirrors warnings
//! and errors to stderr, so one worker's noise never interleaves with
//! another's in the same file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing::Dispatch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Installs the global subscriber.
///
/// Priority: `RUST_LOG` > `log_level` argument.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

/// Path of a worker's log file.
pub fn worker_log_path(logs_dir: &Path, worker_id: usize) -> PathBuf {
    logs_dir.join(format!("worker_{worker_id:02}.log"))
}

/// Builds the dispatcher a worker task runs under.
pub fn worker_dispatch(logs_dir: &Path, worker_id: usize, level: LevelFilter) -> io::Result<Dispatch> {
    fs::create_dir_all(logs_dir)?;
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(worker_log_path(logs_dir, worker_id))?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(level);

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(LevelFilter::WARN);

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer);

    Ok(Dispatch::new(subscriber))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_log_path() {
        assert_eq!(
            worker_log_path(Path::new("/out/logs"), 3),
            PathBuf::from("/out/logs/worker_03.log")
        );
        assert_eq!(
            worker_log_path(Path::new("logs"), 12),
            PathBuf::from("logs/worker_12.log")
        );
    }

    #[test]
    fn test_worker_dispatch_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let dispatch = worker_dispatch(&logs, 1, LevelFilter::INFO).unwrap();

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(worker_id = 1, "hello from worker");
            tracing::debug!("filtered out");
        });

        let text = fs::read_to_string(worker_log_path(&logs, 1)).unwrap();
        assert!(text.contains("hello from worker"));
        assert!(!text.contains("filtered out"));
    }
}
