//! Runtime configuration for the queue and its worker pools.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `HOOKLINE_*` environment variables (plus `DATABASE_URL`), then
//! validation. The standard and hot-path pools share one `PoolSettings`
//! shape and differ only in their values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The configuration file is not valid YAML for this schema.
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tuning of one worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSettings {
    /// Number of worker loops.
    pub worker_count: usize,
    /// Initial sleep after an empty poll.
    pub poll_interval_ms: u64,
    /// Ceiling for the idle backoff.
    pub max_idle_interval_ms: u64,
}

impl PoolSettings {
    /// Settings for the standard pool.
    pub fn standard() -> Self {
        Self {
            worker_count: 10,
            poll_interval_ms: 100,
            max_idle_interval_ms: 1_000,
        }
    }

    /// Settings for the low-latency hot-path pool.
    pub fn hot_path() -> Self {
        Self {
            worker_count: 50,
            poll_interval_ms: 25,
            max_idle_interval_ms: 250,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_idle_interval(&self) -> Duration {
        Duration::from_millis(self.max_idle_interval_ms)
    }

    fn validate(&self, pool: &str) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ValidationFailed(format!(
                "{}.worker_count must be greater than 0",
                pool
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(format!(
                "{}.poll_interval_ms must be greater than 0",
                pool
            )));
        }

        if self.max_idle_interval_ms < self.poll_interval_ms {
            return Err(ConfigError::ValidationFailed(format!(
                "{}.max_idle_interval_ms cannot be lower than poll_interval_ms",
                pool
            )));
        }

        Ok(())
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::standard()
    }
}

/// Pool keys as written in a config file. Absent keys fall back to the
/// defaults of the pool being configured, not to the standard pool.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolSettingsFile {
    worker_count: Option<usize>,
    poll_interval_ms: Option<u64>,
    max_idle_interval_ms: Option<u64>,
}

impl PoolSettingsFile {
    fn merge_onto(self, base: PoolSettings) -> PoolSettings {
        PoolSettings {
            worker_count: self.worker_count.unwrap_or(base.worker_count),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(base.poll_interval_ms),
            max_idle_interval_ms: self
                .max_idle_interval_ms
                .unwrap_or(base.max_idle_interval_ms),
        }
    }
}

fn deserialize_standard_pool<'de, D>(deserializer: D) -> Result<PoolSettings, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(PoolSettingsFile::deserialize(deserializer)?.merge_onto(PoolSettings::standard()))
}

fn deserialize_hot_path_pool<'de, D>(deserializer: D) -> Result<PoolSettings, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(PoolSettingsFile::deserialize(deserializer)?.merge_onto(PoolSettings::hot_path()))
}

/// Configuration for the queue, its pools and background tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    // Storage settings
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Endpoint that receives job payloads. Required by `run`.
    pub handler_url: Option<String>,

    // Retry settings
    /// Attempts allowed before a job is dead-lettered.
    pub max_retries: u32,
    /// Delay before the first retry. Doubles per attempt.
    pub base_retry_delay_ms: u64,
    /// Upper bound for a single handler call.
    pub job_timeout_ms: u64,
    /// How long a job may stay `processing` before the reaper reclaims it.
    pub stale_job_timeout_ms: u64,

    // Lifecycle settings
    /// Interval between metrics snapshots.
    pub metrics_interval_ms: u64,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace_ms: u64,

    // Pools
    #[serde(deserialize_with = "deserialize_standard_pool")]
    pub standard: PoolSettings,
    #[serde(deserialize_with = "deserialize_hot_path_pool")]
    pub hot_path: PoolSettings,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/hookline".to_string(),
            handler_url: None,

            max_retries: 3,
            base_retry_delay_ms: 1_000,
            job_timeout_ms: 30_000,
            stale_job_timeout_ms: 300_000, // 5 minutes

            metrics_interval_ms: 30_000,
            shutdown_grace_ms: 30_000,

            standard: PoolSettings::standard(),
            hot_path: PoolSettings::hot_path(),
        }
    }
}

impl QueueConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a YAML configuration file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parses a YAML document. An empty document yields the defaults.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Loads the optional file, applies environment overrides and validates.
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from a variable lookup.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL
    /// - `HOOKLINE_HANDLER_URL`: payload handler endpoint
    /// - `HOOKLINE_MAX_RETRIES`: attempts before dead-lettering (default: 3)
    /// - `HOOKLINE_BASE_RETRY_DELAY_MS`: first retry delay (default: 1000)
    /// - `HOOKLINE_JOB_TIMEOUT_MS`: handler timeout (default: 30000)
    /// - `HOOKLINE_STALE_JOB_TIMEOUT_MS`: processing lease (default: 300000)
    /// - `HOOKLINE_METRICS_INTERVAL_MS`: snapshot interval (default: 30000)
    /// - `HOOKLINE_SHUTDOWN_GRACE_MS`: drain window (default: 30000)
    /// - `HOOKLINE_WORKER_COUNT`, `HOOKLINE_POLL_INTERVAL_MS`,
    ///   `HOOKLINE_MAX_IDLE_INTERVAL_MS`: standard pool
    /// - `HOOKLINE_HOT_WORKER_COUNT`, `HOOKLINE_HOT_POLL_INTERVAL_MS`,
    ///   `HOOKLINE_HOT_MAX_IDLE_INTERVAL_MS`: hot-path pool
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("DATABASE_URL") {
            self.database_url = val;
        }

        if let Some(val) = lookup("HOOKLINE_HANDLER_URL") {
            self.handler_url = Some(val);
        }

        override_parsed(&lookup, "HOOKLINE_MAX_RETRIES", &mut self.max_retries)?;
        override_parsed(
            &lookup,
            "HOOKLINE_BASE_RETRY_DELAY_MS",
            &mut self.base_retry_delay_ms,
        )?;
        override_parsed(&lookup, "HOOKLINE_JOB_TIMEOUT_MS", &mut self.job_timeout_ms)?;
        override_parsed(
            &lookup,
            "HOOKLINE_STALE_JOB_TIMEOUT_MS",
            &mut self.stale_job_timeout_ms,
        )?;
        override_parsed(
            &lookup,
            "HOOKLINE_METRICS_INTERVAL_MS",
            &mut self.metrics_interval_ms,
        )?;
        override_parsed(
            &lookup,
            "HOOKLINE_SHUTDOWN_GRACE_MS",
            &mut self.shutdown_grace_ms,
        )?;

        // Standard pool
        override_parsed(
            &lookup,
            "HOOKLINE_WORKER_COUNT",
            &mut self.standard.worker_count,
        )?;
        override_parsed(
            &lookup,
            "HOOKLINE_POLL_INTERVAL_MS",
            &mut self.standard.poll_interval_ms,
        )?;
        override_parsed(
            &lookup,
            "HOOKLINE_MAX_IDLE_INTERVAL_MS",
            &mut self.standard.max_idle_interval_ms,
        )?;

        // Hot-path pool
        override_parsed(
            &lookup,
            "HOOKLINE_HOT_WORKER_COUNT",
            &mut self.hot_path.worker_count,
        )?;
        override_parsed(
            &lookup,
            "HOOKLINE_HOT_POLL_INTERVAL_MS",
            &mut self.hot_path.poll_interval_ms,
        )?;
        override_parsed(
            &lookup,
            "HOOKLINE_HOT_MAX_IDLE_INTERVAL_MS",
            &mut self.hot_path.max_idle_interval_ms,
        )?;

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if let Some(url) = &self.handler_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationFailed(format!(
                    "handler_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }

        if self.max_retries == 0 || self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::ValidationFailed(format!(
                "max_retries must be between 1 and {}, got {}",
                MAX_RETRIES_LIMIT, self.max_retries
            )));
        }

        if self.job_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "job_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.stale_job_timeout_ms <= self.job_timeout_ms {
            return Err(ConfigError::ValidationFailed(
                "stale_job_timeout_ms must exceed job_timeout_ms".to_string(),
            ));
        }

        if self.metrics_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "metrics_interval_ms must be greater than 0".to_string(),
            ));
        }

        self.standard.validate("standard")?;
        self.hot_path.validate("hot_path")?;

        Ok(())
    }

    /// Returns the handler URL or a `MissingEnvVar` error naming its variable.
    pub fn require_handler_url(&self) -> Result<&str, ConfigError> {
        self.handler_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("HOOKLINE_HANDLER_URL".to_string()))
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn stale_job_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_job_timeout_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the handler URL.
    pub fn with_handler_url(mut self, url: impl Into<String>) -> Self {
        self.handler_url = Some(url.into());
        self
    }

    /// Builder method to set the retry limit.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Builder method to set the base retry delay.
    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Builder method to set the handler timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method to set the processing lease.
    pub fn with_stale_job_timeout(mut self, timeout: Duration) -> Self {
        self.stale_job_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder method to set the metrics interval.
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method to set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Builder method to replace the standard pool settings.
    pub fn with_standard_pool(mut self, settings: PoolSettings) -> Self {
        self.standard = settings;
        self
    }

    /// Builder method to replace the hot-path pool settings.
    pub fn with_hot_path_pool(mut self, settings: PoolSettings) -> Self {
        self.hot_path = settings;
        self
    }
}

/// Overwrites `target` when `key` is present in the lookup.
fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(val) = lookup(key) {
        *target = parse_env_value(&val, key)?;
    }
    Ok(())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.job_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.stale_job_timeout(), Duration::from_secs(300));
        assert_eq!(config.standard.worker_count, 10);
        assert_eq!(config.standard.max_idle_interval(), Duration::from_secs(1));
        assert_eq!(config.hot_path.worker_count, 50);
        assert_eq!(config.hot_path.poll_interval(), Duration::from_millis(25));
        assert!(config.handler_url.is_none());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(QueueConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = QueueConfig::new()
            .with_database_url("postgres://test/db")
            .with_handler_url("http://localhost:8080/process")
            .with_max_retries(5)
            .with_base_retry_delay(Duration::from_millis(250))
            .with_job_timeout(Duration::from_secs(10))
            .with_shutdown_grace(Duration::from_secs(5));

        assert_eq!(config.database_url, "postgres://test/db");
        assert_eq!(config.require_handler_url().ok(), Some("http://localhost:8080/process"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_retry_delay(), Duration::from_millis(250));
        assert_eq!(config.job_timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_overrides_apply_to_both_pools() {
        let mut config = QueueConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("DATABASE_URL", "postgres://env/db"),
                ("HOOKLINE_HANDLER_URL", "https://handler.internal/run"),
                ("HOOKLINE_WORKER_COUNT", "20"),
                ("HOOKLINE_POLL_INTERVAL_MS", "50"),
                ("HOOKLINE_HOT_WORKER_COUNT", "200"),
                ("HOOKLINE_MAX_RETRIES", "7"),
            ]))
            .expect("overrides should parse");

        assert_eq!(config.database_url, "postgres://env/db");
        assert_eq!(
            config.handler_url.as_deref(),
            Some("https://handler.internal/run")
        );
        assert_eq!(config.standard.worker_count, 20);
        assert_eq!(config.standard.poll_interval_ms, 50);
        assert_eq!(config.hot_path.worker_count, 200);
        assert_eq!(config.hot_path.poll_interval_ms, 25);
        assert_eq!(config.max_retries, 7);
    }

    #[test]
    fn test_override_with_invalid_number() {
        let mut config = QueueConfig::default();
        let result = config.apply_overrides(lookup_from(&[("HOOKLINE_WORKER_COUNT", "many")]));

        match result {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "HOOKLINE_WORKER_COUNT")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_zero_retries() {
        let config = QueueConfig::default().with_max_retries(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_validation_bounds_max_retries() {
        let config = QueueConfig::default().with_max_retries(MAX_RETRIES_LIMIT);
        assert!(config.validate().is_ok());

        let config = QueueConfig::default().with_max_retries(MAX_RETRIES_LIMIT + 1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries must be between 1 and 100"));
    }

    #[test]
    fn test_validation_rejects_lease_shorter_than_timeout() {
        let config = QueueConfig::default()
            .with_job_timeout(Duration::from_secs(60))
            .with_stale_job_timeout(Duration::from_secs(60));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stale_job_timeout_ms"));
    }

    #[test]
    fn test_validation_rejects_empty_pool() {
        let config = QueueConfig::default().with_hot_path_pool(PoolSettings {
            worker_count: 0,
            ..PoolSettings::hot_path()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hot_path.worker_count"));
    }

    #[test]
    fn test_validation_rejects_non_http_handler() {
        let config = QueueConfig::default().with_handler_url("ftp://nope");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_handler_url() {
        let err = QueueConfig::default().require_handler_url().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "HOOKLINE_HANDLER_URL"));
    }

    #[test]
    fn test_yaml_file_partial_override() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "max_retries: 5\nhandler_url: http://localhost:9000/hook\nhot_path:\n  worker_count: 80"
        )
        .expect("write config");

        let config = QueueConfig::from_yaml_file(file.path()).expect("config should parse");

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.handler_url.as_deref(), Some("http://localhost:9000/hook"));
        assert_eq!(config.hot_path.worker_count, 80);
        assert_eq!(config.hot_path.poll_interval_ms, 25);
        assert_eq!(config.standard, PoolSettings::standard());
    }

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let config = QueueConfig::from_yaml_str("   \n").expect("empty config");
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_yaml_rejects_wrong_types() {
        let result = QueueConfig::from_yaml_str("max_retries: lots");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }
}
