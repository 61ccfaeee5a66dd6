//! Error classification and retry policy for scan jobs.
//!
//! Scan sessions report free-form error text. This module maps that text onto
//! a small set of [`ErrorClass`]es and keeps the per-class retry policy:
//!
//! | class                | retries | backoff     | rebuild session |
//! |----------------------|---------|-------------|-----------------|
//! | `timeout`            | 2       | 5s, 10s     | no              |
//! | `connection_refused` | 1       | 3s          | no              |
//! | `driver_crashed`     | 1       | 2s          | yes             |
//! | `ssl_error`          | 1       | 2s          | no              |
//! | `unknown`            | 0       | -           | no              |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out"];
const CONNECTION_REFUSED_MARKERS: &[&str] = &["connection refused"];
const DRIVER_CRASH_MARKERS: &[&str] = &[
    "chrome not reachable",
    "session deleted",
    "session not created",
    "invalid session id",
];
const SSL_MARKERS: &[&str] = &["ssl", "certificate"];

/// Category of a job-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Page load or scan exceeded its time budget.
    Timeout,
    /// The target refused the connection.
    ConnectionRefused,
    /// The browser session died and must be rebuilt.
    DriverCrashed,
    /// TLS handshake or certificate failure.
    SslError,
    /// Anything else. Never retried.
    Unknown,
}

impl ErrorClass {
    /// Every class, in classification order.
    pub const ALL: [ErrorClass; 5] = [
        ErrorClass::Timeout,
        ErrorClass::ConnectionRefused,
        ErrorClass::DriverCrashed,
        ErrorClass::SslError,
        ErrorClass::Unknown,
    ];

    /// Returns the snake_case label used in logs, metrics and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::ConnectionRefused => "connection_refused",
            ErrorClass::DriverCrashed => "driver_crashed",
            ErrorClass::SslError => "ssl_error",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies an error description.
///
/// Matching is case-insensitive and the first matching rule wins, so
/// "session not created: timed out" is a timeout.
pub fn classify(error: &str) -> ErrorClass {
    let lowered = error.to_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if matches(TIMEOUT_MARKERS) {
        ErrorClass::Timeout
    } else if matches(CONNECTION_REFUSED_MARKERS) {
        ErrorClass::ConnectionRefused
    } else if matches(DRIVER_CRASH_MARKERS) {
        ErrorClass::DriverCrashed
    } else if matches(SSL_MARKERS) {
        ErrorClass::SslError
    } else {
        ErrorClass::Unknown
    }
}

/// Retry behaviour for one error class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Sleep before retry `n` is `backoff[min(n, len - 1)]`.
    pub backoff: Vec<Duration>,
    /// Tear down and recreate the session before retrying.
    pub rebuild_session: bool,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Vec::new(),
            rebuild_session: false,
        }
    }

    /// Creates a policy with the given retry count and backoff schedule.
    pub fn new(max_retries: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_retries,
            backoff,
            rebuild_session: false,
        }
    }

    /// Marks the policy as requiring a session rebuild between attempts.
    pub fn with_session_rebuild(mut self) -> Self {
        self.rebuild_session = true;
        self
    }

    /// Whether another attempt is allowed after `retry_count` retries.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Backoff to sleep before retry number `retry_count` (zero-based).
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        match self.backoff.len() {
            0 => Duration::ZERO,
            len => self.backoff[(retry_count as usize).min(len - 1)],
        }
    }

    /// Sum of every backoff this policy can sleep for one job.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries).map(|n| self.backoff_for(n)).sum()
    }
}

/// Retry policies for every [`ErrorClass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTable {
    timeout: RetryPolicy,
    connection_refused: RetryPolicy,
    driver_crashed: RetryPolicy,
    ssl_error: RetryPolicy,
    unknown: RetryPolicy,
}

impl Default for RetryTable {
    fn default() -> Self {
        Self {
            timeout: RetryPolicy::new(2, vec![Duration::from_secs(5), Duration::from_secs(10)]),
            connection_refused: RetryPolicy::new(1, vec![Duration::from_secs(3)]),
            driver_crashed: RetryPolicy::new(1, vec![Duration::from_secs(2)])
                .with_session_rebuild(),
            ssl_error: RetryPolicy::new(1, vec![Duration::from_secs(2)]),
            unknown: RetryPolicy::none(),
        }
    }
}

impl RetryTable {
    /// Returns the policy for a class.
    pub fn policy(&self, class: ErrorClass) -> &RetryPolicy {
        match class {
            ErrorClass::Timeout => &self.timeout,
            ErrorClass::ConnectionRefused => &self.connection_refused,
            ErrorClass::DriverCrashed => &self.driver_crashed,
            ErrorClass::SslError => &self.ssl_error,
            ErrorClass::Unknown => &self.unknown,
        }
    }

    /// Replaces the policy for a class.
    pub fn with_policy(mut self, class: ErrorClass, policy: RetryPolicy) -> Self {
        let slot = match class {
            ErrorClass::Timeout => &mut self.timeout,
            ErrorClass::ConnectionRefused => &mut self.connection_refused,
            ErrorClass::DriverCrashed => &mut self.driver_crashed,
            ErrorClass::SslError => &mut self.ssl_error,
            ErrorClass::Unknown => &mut self.unknown,
        };
        *slot = policy;
        self
    }

    /// Clamps every class to at most `max_retries` retries.
    pub fn capped(mut self, max_retries: u32) -> Self {
        for policy in [
            &mut self.timeout,
            &mut self.connection_refused,
            &mut self.driver_crashed,
            &mut self.ssl_error,
            &mut self.unknown,
        ] {
            policy.max_retries = policy.max_retries.min(max_retries);
        }
        self
    }

    /// Scales every backoff by `factor`. Used to shorten schedules in tests.
    pub fn scaled(mut self, factor: f64) -> Self {
        for policy in [
            &mut self.timeout,
            &mut self.connection_refused,
            &mut self.driver_crashed,
            &mut self.ssl_error,
            &mut self.unknown,
        ] {
            for delay in policy.backoff.iter_mut() {
                *delay = delay.mul_f64(factor);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rules() {
        assert_eq!(classify("Timed out receiving message"), ErrorClass::Timeout);
        assert_eq!(classify("page load TIMEOUT after 30s"), ErrorClass::Timeout);
        assert_eq!(
            classify("net::ERR_CONNECTION_REFUSED: Connection refused"),
            ErrorClass::ConnectionRefused
        );
        assert_eq!(
            classify("chrome not reachable"),
            ErrorClass::DriverCrashed
        );
        assert_eq!(
            classify("invalid session id: session deleted because of page crash"),
            ErrorClass::DriverCrashed
        );
        assert_eq!(classify("SSL handshake failed"), ErrorClass::SslError);
        assert_eq!(
            classify("invalid peer certificate: UnknownIssuer"),
            ErrorClass::SslError
        );
        assert_eq!(classify("dns lookup failed"), ErrorClass::Unknown);
        assert_eq!(classify(""), ErrorClass::Unknown);
    }

    #[test]
    fn test_classify_first_rule_wins() {
        assert_eq!(
            classify("session not created: timed out waiting for renderer"),
            ErrorClass::Timeout
        );
        assert_eq!(
            classify("certificate fetch: connection refused"),
            ErrorClass::ConnectionRefused
        );
    }

    #[test]
    fn test_default_table_shape() {
        let table = RetryTable::default();

        let timeout = table.policy(ErrorClass::Timeout);
        assert_eq!(timeout.max_retries, 2);
        assert_eq!(timeout.backoff_for(0), Duration::from_secs(5));
        assert_eq!(timeout.backoff_for(1), Duration::from_secs(10));
        assert!(!timeout.rebuild_session);

        for class in [ErrorClass::ConnectionRefused, ErrorClass::DriverCrashed, ErrorClass::SslError] {
            let policy = table.policy(class);
            assert_eq!(policy.max_retries, 1, "{class}");
            assert!(policy.backoff_for(0) < timeout.backoff_for(0), "{class}");
        }
        assert!(table.policy(ErrorClass::DriverCrashed).rebuild_session);

        let unknown = table.policy(ErrorClass::Unknown);
        assert_eq!(unknown.max_retries, 0);
        assert!(!unknown.allows_retry(0));
    }

    #[test]
    fn test_backoff_index_clamps_to_last_entry() {
        let policy = RetryPolicy::new(4, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(2));
        assert_eq!(policy.total_backoff(), Duration::from_secs(7));
        assert_eq!(RetryPolicy::none().backoff_for(5), Duration::ZERO);
    }

    #[test]
    fn test_capped_table() {
        let table = RetryTable::default().capped(1);
        assert_eq!(table.policy(ErrorClass::Timeout).max_retries, 1);
        assert_eq!(table.policy(ErrorClass::SslError).max_retries, 1);

        let table = RetryTable::default().capped(0);
        for class in ErrorClass::ALL {
            assert_eq!(table.policy(class).max_retries, 0);
        }
    }

    #[test]
    fn test_scaled_and_with_policy() {
        let table = RetryTable::default()
            .scaled(0.5)
            .with_policy(ErrorClass::Unknown, RetryPolicy::new(1, vec![Duration::from_millis(1)]));

        assert_eq!(
            table.policy(ErrorClass::Timeout).backoff_for(1),
            Duration::from_secs(5)
        );
        assert_eq!(table.policy(ErrorClass::Unknown).max_retries, 1);
    }

    #[test]
    fn test_error_class_labels() {
        assert_eq!(ErrorClass::ConnectionRefused.to_string(), "connection_refused");
        assert_eq!(
            serde_json::to_string(&ErrorClass::DriverCrashed).unwrap(),
            "\"driver_crashed\""
        );
    }
}
