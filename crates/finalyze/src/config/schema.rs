use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_upload_directory")]
    pub upload_directory: PathBuf,
    /// Whether submissions are accepted for background processing.
    #[serde(default = "default_true")]
    pub async_enabled: bool,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default = "default_store_retry")]
    pub store_retry: RetryConfig,
    #[serde(default = "default_enqueue_retry")]
    pub enqueue_retry: RetryConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            upload_directory: default_upload_directory(),
            async_enabled: true,
            max_upload_bytes: default_max_upload_bytes(),
            worker: WorkerConfig::default(),
            store_retry: default_store_retry(),
            enqueue_retry: default_enqueue_retry(),
            history: HistoryConfig::default(),
            analyzer: AnalyzerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/finalyze.db")
}

fn default_upload_directory() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_true() -> bool {
    true
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_store_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 50,
    }
}

fn default_enqueue_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 100,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// How long an idle worker waits on the queue per poll.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a delivered message and its job lease stay claimed without a
    /// heartbeat. Must exceed `heartbeat_interval_secs`.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_analysis_time_limit_secs")]
    pub analysis_time_limit_secs: u64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn analysis_time_limit(&self) -> Duration {
        Duration::from_secs(self.analysis_time_limit_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            analysis_time_limit_secs: default_analysis_time_limit_secs(),
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_visibility_timeout_secs() -> u64 {
    660
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_analysis_time_limit_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub default_limit: u32,
    #[serde(default = "default_history_max_limit")]
    pub max_limit: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max_limit(),
        }
    }
}

fn default_history_limit() -> u32 {
    10
}

fn default_history_max_limit() -> u32 {
    100
}

/// External program that performs the analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one JSON object per line instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
