//! Job definitions for the scheduler.
//!
//! - `Job`: one scan target
//! - `Artifact`: the opaque output of a scan session
//! - `JobResult`: what a worker reports for a finished job

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retry::ErrorClass;

/// Current artifact serialization schema.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Stages recorded for a job that went through the whole scan.
pub const SCAN_STAGES: [&str; 4] = ["browse", "capture", "analyze", "persist"];

/// Longest error text kept on a synthesized failure artifact.
const ARTIFACT_ERROR_LIMIT: usize = 200;

/// A single scan target. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job {
    target: String,
}

impl Job {
    /// Creates a job for a target identifier (usually a URL).
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Returns the target identifier.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target)
    }
}

impl From<&str> for Job {
    fn from(target: &str) -> Self {
        Self::new(target)
    }
}

impl From<String> for Job {
    fn from(target: String) -> Self {
        Self::new(target)
    }
}

/// Output of a scan session.
///
/// The scheduler never looks inside `payload`. It only reads `error_state`
/// to tell a clean capture from one the session itself marked as failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Serialization schema of this artifact.
    pub schema_version: u32,
    /// Set by the session when the capture completed with an error.
    #[serde(default)]
    pub error_state: Option<String>,
    /// Session-defined content (screenshot paths, headers, signatures...).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Artifact {
    /// Creates a clean artifact around a session payload.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            error_state: None,
            payload,
        }
    }

    /// Creates an artifact describing a job that could not be scanned.
    pub fn failed(job: &Job, error: &str) -> Self {
        Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            error_state: Some(truncate(error, ARTIFACT_ERROR_LIMIT)),
            payload: serde_json::json!({ "target": job.target() }),
        }
    }

    /// Sets the error state.
    pub fn with_error_state(mut self, error: impl Into<String>) -> Self {
        self.error_state = Some(error.into());
        self
    }

    /// Returns true if the session reported no error.
    pub fn is_success(&self) -> bool {
        self.error_state.is_none()
    }

    /// Returns the session's error description, if any.
    pub fn error_text(&self) -> Option<&str> {
        self.error_state.as_deref()
    }

    /// Serializes the artifact for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Restores an artifact from its stored form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Result of processing one job, created once by the worker that ran it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// The job that was processed.
    pub job: Job,
    /// Whether the scan completed cleanly.
    pub success: bool,
    /// Session output, or a synthesized failure artifact.
    pub artifact: Option<Artifact>,
    /// Last error seen for the job.
    pub error: Option<String>,
    /// Classification of `error`.
    pub error_class: Option<ErrorClass>,
    /// Worker that produced the result.
    pub worker_id: usize,
    /// Wall time from first attempt to result, backoff included.
    pub processing_time: Duration,
    /// Retries performed after the first attempt.
    pub retry_count: u32,
    /// Scan stages that completed.
    pub stages_completed: Vec<String>,
    /// When the result was produced.
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    /// Builds a result from an artifact returned by the session.
    ///
    /// An artifact carrying an `error_state` is a completed but failed job.
    pub fn from_artifact(
        job: Job,
        artifact: Artifact,
        worker_id: usize,
        processing_time: Duration,
        retry_count: u32,
    ) -> Self {
        let error = artifact.error_text().map(str::to_string);
        let error_class = error.as_deref().map(super::retry::classify);

        Self {
            job,
            success: artifact.is_success(),
            artifact: Some(artifact),
            error,
            error_class,
            worker_id,
            processing_time,
            retry_count,
            stages_completed: SCAN_STAGES.iter().map(|s| s.to_string()).collect(),
            completed_at: Utc::now(),
        }
    }

    /// Builds a failed result after retries were exhausted.
    pub fn failure(
        job: Job,
        error: impl Into<String>,
        error_class: ErrorClass,
        worker_id: usize,
        processing_time: Duration,
        retry_count: u32,
    ) -> Self {
        let error = error.into();
        let artifact = Artifact::failed(&job, &error);

        Self {
            job,
            success: false,
            artifact: Some(artifact),
            error: Some(error),
            error_class: Some(error_class),
            worker_id,
            processing_time,
            retry_count,
            stages_completed: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Returns the job target.
    pub fn target(&self) -> &str {
        self.job.target()
    }
}

/// Truncates to at most `limit` characters on a char boundary.
pub(crate) fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
