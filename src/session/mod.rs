//! Scan session contracts.
//!
//! A worker owns exactly one [`ScanSession`] at a time, created by a
//! [`SessionFactory`] inside the worker's private profile directory. The
//! scheduler treats sessions as black boxes: it only sees the returned
//! [`Artifact`] or the [`SessionError`] text, which it classifies for retry.

pub mod http_probe;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::scheduler::job::{Artifact, Job};

pub use http_probe::{HttpProbeFactory, HttpProbeSession};

/// Default per-page timeout.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by scan sessions.
///
/// The `Display` text of each variant is what retry classification reads,
/// so the prefixes match the classification markers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session could not be created.
    #[error("session not created: {0}")]
    Create(String),

    /// The scan failed.
    #[error("{0}")]
    Execute(String),

    /// The scan exceeded its time budget.
    #[error("scan timed out after {0:?}")]
    Timeout(Duration),

    /// The session died and must be rebuilt.
    #[error("session deleted: {0}")]
    Crashed(String),
}

/// Settings handed to every session a factory creates.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Budget for loading one target.
    pub page_timeout: Duration,
    /// User agent override.
    pub user_agent: Option<String>,
    /// Accept invalid TLS certificates.
    pub accept_invalid_certs: bool,
    /// Maximum redirects followed per target.
    pub max_redirects: usize,
    /// Maximum response bytes kept per capture.
    pub max_body_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            user_agent: None,
            accept_invalid_certs: false,
            max_redirects: 10,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl SessionConfig {
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Caps how much of a response body is captured.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

/// A live scan session bound to one worker.
#[async_trait]
pub trait ScanSession: Send {
    /// Scans one target.
    ///
    /// An `Ok` artifact carrying an `error_state` means the scan completed
    /// but the target itself failed; it is not retried.
    async fn execute(&mut self, job: &Job) -> Result<Artifact, SessionError>;

    /// Releases the session's resources. Must be safe to call more than once.
    async fn teardown(&mut self);
}

/// Creates scan sessions for workers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Creates a session for `worker_id` rooted in `profile_dir`.
    async fn create_session(
        &self,
        worker_id: usize,
        profile_dir: &Path,
        config: &SessionConfig,
    ) -> Result<Box<dyn ScanSession>, SessionError>;
}
