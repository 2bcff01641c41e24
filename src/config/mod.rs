//! Configuration

use crate::queue::RetentionPolicy;
use crate::task::executor::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming a config file
pub const CONFIG_PATH_ENV: &str = "ADMIN_QUEUE_CONFIG";

/// Prefix of per-field environment variables
pub const ENV_PREFIX: &str = "ADMIN_QUEUE_";

/// Configuration for the task queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Maximum number of tasks executing at once
    pub max_concurrent: usize,

    /// Maximum number of unfinished tasks held by the queue
    pub max_queue_size: usize,

    /// Automatic retries for tasks that do not set their own
    pub default_max_retries: u32,

    /// Per-attempt deadline for tasks that do not set their own; 0 disables it
    pub default_timeout_secs: u64,

    /// Delay before the first automatic retry
    pub retry_base_delay_ms: u64,

    /// Upper bound for the retry delay
    pub retry_max_delay_ms: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,

    /// Keep at most this many finished tasks
    pub retention_max_finished: Option<usize>,

    /// Drop finished tasks older than this
    pub retention_max_age_secs: Option<u64>,

    /// Interval of the retention sweep run by the binary
    pub cleanup_interval_secs: u64,

    /// Enable task persistence
    pub enable_persistence: bool,

    /// JSON document used when persistence is enabled
    pub persistence_path: String,

    /// Log level for the binary (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queue_size: 10000,
            default_max_retries: 3,
            default_timeout_secs: 3600,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            shutdown_timeout_secs: 30,
            retention_max_finished: None,
            retention_max_age_secs: None,
            cleanup_interval_secs: 300,
            enable_persistence: false,
            persistence_path: "tasks.json".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create a configuration with the given execution ceiling
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..Default::default()
        }
    }

    /// Load configuration from file, environment variables, or defaults
    pub fn load() -> crate::Result<Self> {
        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            info!("Loading config from {}: {}", CONFIG_PATH_ENV, config_path);
            return Self::from_file(&config_path);
        }

        let default_paths = [
            "config.yaml",
            "config.toml",
            "config/config.yaml",
            "config/config.toml",
        ];

        for path in default_paths {
            if Path::new(path).exists() {
                info!("Loading config from: {}", path);
                return Self::from_file(path);
            }
        }

        if let Ok(config) = Self::from_env() {
            info!("Loaded config from environment variables");
            return Ok(config);
        }

        warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a file (YAML or TOML). Missing fields take
    /// their defaults.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .map_err(|e| {
                crate::TaskQueueError::ConfigError(format!("Failed to load config file: {}", e))
            })?;

        let config: Config = settings.try_deserialize().map_err(|e| {
            crate::TaskQueueError::ConfigError(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `ADMIN_QUEUE_*` environment variables.
    ///
    /// Fails when none of them is set.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        let mut found_any = false;

        found_any |= read_env("MAX_CONCURRENT", &mut config.max_concurrent)?;
        found_any |= read_env("MAX_QUEUE_SIZE", &mut config.max_queue_size)?;
        found_any |= read_env("DEFAULT_MAX_RETRIES", &mut config.default_max_retries)?;
        found_any |= read_env("DEFAULT_TIMEOUT_SECS", &mut config.default_timeout_secs)?;
        found_any |= read_env("RETRY_BASE_DELAY_MS", &mut config.retry_base_delay_ms)?;
        found_any |= read_env("RETRY_MAX_DELAY_MS", &mut config.retry_max_delay_ms)?;
        found_any |= read_env("SHUTDOWN_TIMEOUT_SECS", &mut config.shutdown_timeout_secs)?;
        found_any |= read_env("CLEANUP_INTERVAL_SECS", &mut config.cleanup_interval_secs)?;
        found_any |= read_env("ENABLE_PERSISTENCE", &mut config.enable_persistence)?;
        found_any |= read_env("PERSISTENCE_PATH", &mut config.persistence_path)?;
        found_any |= read_env("LOG_LEVEL", &mut config.log_level)?;

        let mut max_finished = 0usize;
        if read_env("RETENTION_MAX_FINISHED", &mut max_finished)? {
            config.retention_max_finished = Some(max_finished);
            found_any = true;
        }
        let mut max_age = 0u64;
        if read_env("RETENTION_MAX_AGE_SECS", &mut max_age)? {
            config.retention_max_age_secs = Some(max_age);
            found_any = true;
        }

        if !found_any {
            return Err(crate::TaskQueueError::ConfigError(
                "No environment variables found".to_string(),
            ));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_concurrent == 0 {
            return Err(crate::TaskQueueError::ConfigError(
                "Max concurrent tasks must be greater than 0".to_string(),
            ));
        }

        if self.max_queue_size == 0 {
            return Err(crate::TaskQueueError::ConfigError(
                "Max queue size must be greater than 0".to_string(),
            ));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(crate::TaskQueueError::ConfigError(
                "Retry base delay must not exceed the max delay".to_string(),
            ));
        }

        if self.cleanup_interval_secs == 0 {
            return Err(crate::TaskQueueError::ConfigError(
                "Cleanup interval must be greater than 0".to_string(),
            ));
        }

        if self.enable_persistence && self.persistence_path.trim().is_empty() {
            return Err(crate::TaskQueueError::ConfigError(
                "Persistence path must be set when persistence is enabled".to_string(),
            ));
        }

        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(crate::TaskQueueError::ConfigError(format!(
                "Invalid log level: {}",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Backoff between automatic retries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Retention applied by the periodic cleanup
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_finished: self.retention_max_finished,
            max_age: self.retention_max_age_secs.map(Duration::from_secs),
        }
    }

    /// Deadline for [`crate::TaskQueue::shutdown`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Overwrite `target` from `ADMIN_QUEUE_<name>` when set
fn read_env<T>(name: &str, target: &mut T) -> crate::Result<bool>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(format!("{ENV_PREFIX}{name}")) {
        Ok(val) => {
            *target = val.parse().map_err(|e| {
                crate::TaskQueueError::ConfigError(format!("Invalid {}: {}", name, e))
            })?;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}
