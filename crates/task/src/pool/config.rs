//! Keyed worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration_millis;
use crate::error::TaskError;
use crate::scheduler::SchedulerConfig;

/// Keyed worker pool configuration
///
/// # Example
///
/// ```
/// use amp_task::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new("cell-sync")
///     .with_worker_count(8)
///     .with_max_attempts(3)
///     .with_shutdown_timeout(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Label of the pool's context (workers are labelled `{label}.worker-{n}`)
    pub label: String,

    /// Number of workers, at least 1
    pub worker_count: usize,

    /// Maximum executions per item (including the first), at least 1
    pub max_attempts: u32,

    /// How long [`shutdown`](crate::KeyedWorkerPool::shutdown) lets queued work drain
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Retry delay policy used by [`from_config`](crate::KeyedWorkerPool::from_config)
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            label: "pool".to_string(),
            worker_count: 4,
            max_attempts: 5,
            shutdown_timeout: Duration::from_secs(30),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults and the given label
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `AMP_POOL_LABEL`: pool label (default: `pool`)
    /// - `AMP_POOL_WORKERS`: worker count (default: 4)
    /// - `AMP_POOL_MAX_ATTEMPTS`: attempts per item (default: 5)
    /// - `AMP_POOL_SHUTDOWN_TIMEOUT_MS`: drain budget on shutdown (default: 30000)
    /// - `AMP_POOL_RETRY_MIN_MS` / `AMP_POOL_RETRY_MAX_MS`: bounds of the
    ///   static retry scheduler (default: 100 / 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let label = std::env::var("AMP_POOL_LABEL").unwrap_or(defaults.label);

        let worker_count = env_parse("AMP_POOL_WORKERS").unwrap_or(defaults.worker_count);

        let max_attempts = env_parse("AMP_POOL_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts);

        let shutdown_timeout = env_parse("AMP_POOL_SHUTDOWN_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_timeout);

        let min_delay = env_parse("AMP_POOL_RETRY_MIN_MS").map(Duration::from_millis);
        let max_delay = env_parse("AMP_POOL_RETRY_MAX_MS").map(Duration::from_millis);
        let scheduler = match (min_delay, max_delay) {
            (None, None) => defaults.scheduler,
            (min, max) => SchedulerConfig::Static {
                min_delay: min.unwrap_or(Duration::from_millis(100)),
                max_delay: max.unwrap_or(Duration::from_secs(2)),
                ramp_attempts: None,
            },
        };

        Self {
            label,
            worker_count,
            max_attempts,
            shutdown_timeout,
            scheduler,
        }
    }

    /// Set the number of workers
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the maximum number of attempts per item
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the shutdown drain budget
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.worker_count == 0 {
            return Err(TaskError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(TaskError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        self.scheduler.validate()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.label, "pool");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new("pins")
            .with_worker_count(2)
            .with_max_attempts(7)
            .with_shutdown_timeout(Duration::from_millis(1500))
            .with_scheduler(SchedulerConfig::Fixed {
                delay: Duration::from_millis(10),
            });

        assert_eq!(config.label, "pins");
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        let err = PoolConfig::new("pins").with_worker_count(0).validate().unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_attempts_is_invalid() {
        let err = PoolConfig::new("pins").with_max_attempts(0).validate().unwrap_err();
        assert!(matches!(err, TaskError::InvalidConfig(_)));
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("AMP_POOL_WORKERS", "6");
        std::env::set_var("AMP_POOL_RETRY_MAX_MS", "900");
        let config = PoolConfig::from_env();
        std::env::remove_var("AMP_POOL_WORKERS");
        std::env::remove_var("AMP_POOL_RETRY_MAX_MS");

        assert_eq!(config.worker_count, 6);
        assert_eq!(
            config.scheduler,
            SchedulerConfig::Static {
                min_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(900),
                ramp_attempts: None,
            }
        );
    }

    #[test]
    fn test_deserialize_with_default_scheduler() {
        let config: PoolConfig = serde_json::from_str(
            r#"{"label": "cells", "worker_count": 3, "max_attempts": 2, "shutdown_timeout": 250}"#,
        )
        .unwrap();

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }
}
