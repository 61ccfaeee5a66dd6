//! Scan configuration.
//!
//! [`ScanConfig`] is built from defaults, then an optional YAML file, then
//! `PARASCAN_*` environment variables, then command-line flags, and is
//! validated once at the end.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;
use crate::resources::DEFAULT_MEMORY_LIMIT_PERCENT;
use crate::scheduler::{RetryTable, WorkerPoolConfig, WriterConfig};
use crate::session::SessionConfig;

/// Database file name inside the output directory.
pub const DEFAULT_DB_NAME: &str = "parascan.db";

/// Configuration for a scan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    // Pool settings
    /// Requested worker count. `None` means two per CPU core.
    pub workers: Option<usize>,
    /// Upper bound on retries for any error class.
    pub max_retries: u32,
    /// Budget for one scan attempt, in seconds.
    pub job_timeout_secs: u64,
    /// Result queue capacity.
    pub result_queue_capacity: usize,
    /// Spread worker startup.
    pub stagger: bool,

    // Session settings
    /// Page load timeout, in seconds.
    pub page_timeout_secs: u64,
    pub user_agent: Option<String>,
    pub accept_invalid_certs: bool,
    /// Also scan `https://` for targets given without a scheme.
    pub prepend_https: bool,

    // Storage settings
    /// Run output directory (database, logs, failed-target files).
    pub output_dir: PathBuf,
    /// Database path. Defaults to `<output_dir>/parascan.db`.
    pub db_path: Option<PathBuf>,
    /// Parent of the per-worker profile directories. Defaults to the system temp dir.
    pub profile_root: Option<PathBuf>,

    // Writer settings
    pub batch_size: usize,
    /// Time-based flush interval, in seconds.
    pub flush_interval_secs: u64,

    // Resource settings
    /// Host memory use (percent) above which a reduce warning is logged.
    pub memory_limit_percent: f64,
    /// Free disk space (GB) below which a warning is logged.
    pub min_disk_gb: f64,

    // Logging settings
    /// Level of the per-worker log files (`off` disables them).
    pub worker_log_level: String,
    /// Print the summary block to stdout when the run ends.
    pub print_summary: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_retries: 2,
            job_timeout_secs: 120,
            result_queue_capacity: 256,
            stagger: true,

            page_timeout_secs: 30,
            user_agent: None,
            accept_invalid_certs: false,
            prepend_https: false,

            output_dir: PathBuf::from("parascan_output"),
            db_path: None,
            profile_root: None,

            batch_size: 10,
            flush_interval_secs: 5,

            memory_limit_percent: DEFAULT_MEMORY_LIMIT_PERCENT,
            min_disk_gb: 1.0,

            worker_log_level: "info".to_string(),
            print_summary: true,
        }
    }
}

impl ScanConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from defaults and environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML file. Missing fields take their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overrides fields from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PARASCAN_WORKERS`: Requested worker count
    /// - `PARASCAN_MAX_RETRIES`: Retry cap for every error class (default: 2)
    /// - `PARASCAN_JOB_TIMEOUT_SECS`: Scan attempt budget (default: 120)
    /// - `PARASCAN_PAGE_TIMEOUT_SECS`: Page load timeout (default: 30)
    /// - `PARASCAN_OUTPUT_DIR`: Output directory (default: parascan_output)
    /// - `PARASCAN_DB_PATH`: Database path
    /// - `PARASCAN_PROFILE_ROOT`: Parent of worker profile directories
    /// - `PARASCAN_BATCH_SIZE`: Results per write transaction (default: 10)
    /// - `PARASCAN_FLUSH_INTERVAL_SECS`: Writer time flush (default: 5)
    /// - `PARASCAN_MEMORY_LIMIT_PERCENT`: Memory pressure threshold (default: 80)
    /// - `PARASCAN_MIN_DISK_GB`: Disk space warning threshold (default: 1.0)
    /// - `PARASCAN_USER_AGENT`: User agent override
    /// - `PARASCAN_ACCEPT_INVALID_CERTS`: Accept invalid TLS certificates
    /// - `PARASCAN_STAGGER`: Stagger worker startup (default: true)
    /// - `PARASCAN_WORKER_LOG_LEVEL`: Worker log file level (default: info)
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var("PARASCAN_WORKERS") {
            self.workers = Some(parse_env_value(&val, "PARASCAN_WORKERS")?);
        }

        if let Ok(val) = std::env::var("PARASCAN_MAX_RETRIES") {
            self.max_retries = parse_env_value(&val, "PARASCAN_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_JOB_TIMEOUT_SECS") {
            self.job_timeout_secs = parse_env_value(&val, "PARASCAN_JOB_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_PAGE_TIMEOUT_SECS") {
            self.page_timeout_secs = parse_env_value(&val, "PARASCAN_PAGE_TIMEOUT_SECS")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PARASCAN_DB_PATH") {
            self.db_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("PARASCAN_PROFILE_ROOT") {
            self.profile_root = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("PARASCAN_BATCH_SIZE") {
            self.batch_size = parse_env_value(&val, "PARASCAN_BATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_FLUSH_INTERVAL_SECS") {
            self.flush_interval_secs = parse_env_value(&val, "PARASCAN_FLUSH_INTERVAL_SECS")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_MEMORY_LIMIT_PERCENT") {
            self.memory_limit_percent = parse_env_value(&val, "PARASCAN_MEMORY_LIMIT_PERCENT")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_MIN_DISK_GB") {
            self.min_disk_gb = parse_env_value(&val, "PARASCAN_MIN_DISK_GB")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_USER_AGENT") {
            self.user_agent = Some(val);
        }

        if let Ok(val) = std::env::var("PARASCAN_ACCEPT_INVALID_CERTS") {
            self.accept_invalid_certs = parse_env_bool(&val, "PARASCAN_ACCEPT_INVALID_CERTS")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_STAGGER") {
            self.stagger = parse_env_bool(&val, "PARASCAN_STAGGER")?;
        }

        if let Ok(val) = std::env::var("PARASCAN_WORKER_LOG_LEVEL") {
            self.worker_log_level = val;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "workers must be greater than 0".to_string(),
            ));
        }

        if self.job_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "job_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.page_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "page_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.result_queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "result_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if !(1.0..=100.0).contains(&self.memory_limit_percent) {
            return Err(ConfigError::ValidationFailed(
                "memory_limit_percent must be between 1 and 100".to_string(),
            ));
        }

        if self.min_disk_gb < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "min_disk_gb cannot be negative".to_string(),
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_dir cannot be empty".to_string(),
            ));
        }

        self.worker_level()?;
        Ok(())
    }

    /// Builder method to set the requested worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_profile_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_root = Some(path.into());
        self
    }

    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_page_timeout_secs(mut self, secs: u64) -> Self {
        self.page_timeout_secs = secs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_stagger(mut self, stagger: bool) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_prepend_https(mut self, prepend: bool) -> Self {
        self.prepend_https = prepend;
        self
    }

    pub fn with_worker_log_level(mut self, level: impl Into<String>) -> Self {
        self.worker_log_level = level.into();
        self
    }

    pub fn with_print_summary(mut self, print: bool) -> Self {
        self.print_summary = print;
        self
    }

    /// Requested worker count, defaulting to two per CPU core.
    pub fn requested_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(2)
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_DB_NAME))
    }

    pub fn profile_root(&self) -> PathBuf {
        self.profile_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Parsed worker log level.
    pub fn worker_level(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.worker_log_level).map_err(|e| ConfigError::InvalidValue {
            key: "worker_log_level".to_string(),
            message: e.to_string(),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::default()
            .with_page_timeout(Duration::from_secs(self.page_timeout_secs))
            .with_accept_invalid_certs(self.accept_invalid_certs);
        if let Some(agent) = &self.user_agent {
            session = session.with_user_agent(agent.clone());
        }
        session
    }

    /// Default retry table capped at `max_retries`.
    pub fn retry_table(&self) -> RetryTable {
        RetryTable::default().capped(self.max_retries)
    }

    /// Pool configuration for a run with `num_workers` workers.
    pub fn pool_config(&self, num_workers: usize) -> Result<WorkerPoolConfig, ConfigError> {
        let writer = WriterConfig::default()
            .with_batch_size(self.batch_size)
            .with_flush_interval(Duration::from_secs(self.flush_interval_secs));

        let mut config = WorkerPoolConfig::new(num_workers)
            .with_output_dir(&self.output_dir)
            .with_profile_root(self.profile_root())
            .with_job_timeout(self.job_timeout())
            .with_retry_table(self.retry_table())
            .with_session(self.session_config())
            .with_writer(writer)
            .with_stagger(self.stagger)
            .with_worker_log_level(self.worker_level()?)
            .with_print_summary(self.print_summary);
        config.result_queue_capacity = self.result_queue_capacity;
        Ok(config)
    }
}

/// Parses an environment variable value into the specified type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parses a boolean environment variable value.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ErrorClass;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.db_path(), PathBuf::from("parascan_output/parascan.db"));
        assert!(config.requested_workers() >= 2);
    }

    #[test]
    fn test_validation_failures() {
        assert!(ScanConfig::default().with_workers(0).validate().is_err());
        assert!(ScanConfig::default().with_batch_size(0).validate().is_err());
        assert!(ScanConfig::default().with_job_timeout_secs(0).validate().is_err());
        assert!(ScanConfig::default()
            .with_worker_log_level("chatty")
            .validate()
            .is_err());

        let mut config = ScanConfig::default();
        config.memory_limit_percent = 120.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_yaml_partial_file() {
        let config = ScanConfig::from_yaml_str(
            "workers: 3\nmax_retries: 1\noutput_dir: /tmp/scan\nprepend_https: true\n",
        )
        .unwrap();
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/scan"));
        assert!(config.prepend_https);
        assert_eq!(config.batch_size, 10);

        assert!(matches!(
            ScanConfig::from_yaml_str("workers: [not a number]"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.yaml");
        std::fs::write(&path, "batch_size: 25\nworker_log_level: debug\n").unwrap();

        let config = ScanConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.worker_level().unwrap(), LevelFilter::DEBUG);
    }

    #[test]
    fn test_pool_config_mapping() {
        let config = ScanConfig::default()
            .with_max_retries(1)
            .with_output_dir("/out")
            .with_profile_root("/profiles")
            .with_batch_size(4)
            .with_stagger(false);

        let pool = config.pool_config(3).unwrap();
        assert_eq!(pool.num_workers, 3);
        assert_eq!(pool.output_dir, PathBuf::from("/out"));
        assert_eq!(pool.profile_root, PathBuf::from("/profiles"));
        assert_eq!(pool.writer.batch_size, 4);
        assert!(!pool.stagger);
        assert_eq!(pool.retry_table.policy(ErrorClass::Timeout).max_retries, 1);
        assert_eq!(pool.session.page_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_env_helpers() {
        assert_eq!(parse_env_value::<usize>(" 4 ", "K").unwrap(), 4);
        assert!(parse_env_value::<usize>("four", "K").is_err());
        assert!(parse_env_bool("YES", "K").unwrap());
        assert!(!parse_env_bool("off", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());
    }

    #[test]
    fn test_options_serialize_for_store() {
        let config = ScanConfig::default().with_workers(2);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["workers"], 2);
        let back: ScanConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
