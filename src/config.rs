//! Configuration for the inventory tracker.
//!
//! Settings come from a TOML or INI file plus `INVENTORY_TRACKER__*`
//! environment variables (`INVENTORY_TRACKER__DATABASE__PASSWORD=...`).
//! Environment values win.
//!
//! # Example
//!
//! ```
//! use inventory_tracker::config::TrackerConfig;
//!
//! // Minimal config (uses defaults)
//! let config = TrackerConfig::default();
//! assert_eq!(config.scheduler.query_time, "23:00");
//! assert_eq!(config.scheduler.retry_attempts, 3);
//! assert_eq!(config.report.highlight_threshold, 10.0);
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::NaiveTime;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::gateway::{BackendKind, GatewayOptions};
use crate::resilience::retry::{Backoff, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source database connection.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_kind")]
    pub kind: BackendKind,

    /// Full connection URL; overrides the individual fields below
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Database name (MySQL) or file path (SQLite)
    #[serde(default)]
    pub database: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds to wait for a free connection
    #[serde(default = "default_pool_timeout_secs")]
    pub pool_timeout_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_kind() -> BackendKind { BackendKind::Mysql }
fn default_host() -> String { "localhost".to_string() }
fn default_max_connections() -> usize { 5 }
fn default_pool_timeout_secs() -> u64 { 30 }
fn default_query_timeout_secs() -> u64 { 60 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            url: None,
            host: default_host(),
            port: None,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            max_connections: default_max_connections(),
            pool_timeout_secs: default_pool_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Connection URL for the configured backend.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.to_string());
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "database.url or database.database must be set".to_string(),
            ));
        }
        Ok(match self.kind {
            BackendKind::Mysql => {
                let port = self.port.unwrap_or(3306);
                if self.username.is_empty() {
                    format!("mysql://{}:{}/{}", self.host, port, self.database)
                } else {
                    format!(
                        "mysql://{}:{}@{}:{}/{}",
                        urlencoding::encode(&self.username),
                        urlencoding::encode(&self.password),
                        self.host,
                        port,
                        self.database
                    )
                }
            }
            BackendKind::Sqlite => format!("sqlite://{}?mode=ro", self.database),
        })
    }

    #[must_use]
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.pool_timeout_secs),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Local time of the daily poll, `HH:MM` or `HH:MM:SS`
    #[serde(default = "default_query_time")]
    pub query_time: String,
    /// Source queries per cycle, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default)]
    pub backoff: Backoff,
    /// Snapshots older than this many days are purged
    #[serde(default = "default_max_data_age_days")]
    pub max_data_age_days: u32,
    /// Delay before re-polling after a degraded cycle (0 disables resync)
    #[serde(default = "default_resync_after_secs")]
    pub resync_after_secs: u64,
    /// Resyncs allowed between two daily triggers
    #[serde(default = "default_max_resyncs")]
    pub max_resyncs: u32,
    /// Poll attempts kept for inspection
    #[serde(default = "default_attempt_log_len")]
    pub attempt_log_len: usize,
}

fn default_query_time() -> String { "23:00".to_string() }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_interval_secs() -> u64 { 600 }
fn default_max_data_age_days() -> u32 { 90 }
fn default_resync_after_secs() -> u64 { 3600 }
fn default_max_resyncs() -> u32 { 3 }
fn default_attempt_log_len() -> usize { 32 }

/// A century of daily snapshots.
const MAX_DATA_AGE_DAYS: u32 = 36_500;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            query_time: default_query_time(),
            retry_attempts: default_retry_attempts(),
            retry_interval_secs: default_retry_interval_secs(),
            backoff: Backoff::default(),
            max_data_age_days: default_max_data_age_days(),
            resync_after_secs: default_resync_after_secs(),
            max_resyncs: default_max_resyncs(),
            attempt_log_len: default_attempt_log_len(),
        }
    }
}

impl SchedulerConfig {
    pub fn query_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_time_of_day(&self.query_time)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_secs(self.retry_interval_secs),
            self.backoff,
        )
    }

    #[must_use]
    pub fn resync_after(&self) -> Option<Duration> {
        (self.resync_after_secs > 0 && self.max_resyncs > 0).then(|| Duration::from_secs(self.resync_after_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Percent change at which an event is highlighted
    #[serde(default = "default_highlight_threshold")]
    pub highlight_threshold: f64,
}

fn default_highlight_threshold() -> f64 { 10.0 }

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            highlight_threshold: default_highlight_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding the snapshot history
    #[serde(default = "default_snapshot_db")]
    pub snapshot_db: String,
}

fn default_snapshot_db() -> String { "data/inventory.db".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_db: default_snapshot_db(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

impl TrackerConfig {
    /// Load from `path` (TOML or INI, by extension) layered under the environment.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("INVENTORY_TRACKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TrackerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the tracker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.query_time()?;

        if self.scheduler.retry_attempts == 0 {
            return Err(ConfigError::Invalid("scheduler.retry_attempts must be at least 1".into()));
        }
        if !(1..=MAX_DATA_AGE_DAYS).contains(&self.scheduler.max_data_age_days) {
            return Err(ConfigError::Invalid(format!(
                "scheduler.max_data_age_days must be between 1 and {}, got {}",
                MAX_DATA_AGE_DAYS, self.scheduler.max_data_age_days
            )));
        }
        if self.scheduler.attempt_log_len == 0 {
            return Err(ConfigError::Invalid("scheduler.attempt_log_len must be at least 1".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".into()));
        }
        if self.database.pool_timeout_secs == 0 || self.database.query_timeout_secs == 0 {
            return Err(ConfigError::Invalid("database timeouts must be positive".into()));
        }
        let threshold = self.report.highlight_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "report.highlight_threshold must be a non-negative number, got {}",
                threshold
            )));
        }
        if self.storage.snapshot_db.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.snapshot_db must be set".into()));
        }
        self.database.connection_url()?;
        Ok(())
    }
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, ConfigError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ConfigError::Invalid(format!("scheduler.query_time '{}' is not HH:MM", s)))
}
