//! Serializable scheduler selection

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ExponentialScheduler, FixedScheduler, Scheduler, StaticScheduler};
use crate::duration_millis;
use crate::error::TaskError;

/// Describes which retry policy a pool should use
///
/// # Example
///
/// ```
/// use amp_task::scheduler::SchedulerConfig;
///
/// let config: SchedulerConfig = serde_json::from_str(
///     r#"{"policy": "static", "min_delay": 100, "max_delay": 2000}"#,
/// ).unwrap();
///
/// let scheduler = config.build().unwrap();
/// assert_eq!(scheduler.max_delay().as_millis(), 2000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SchedulerConfig {
    /// Linear ramp, see [`StaticScheduler`]
    Static {
        #[serde(with = "duration_millis")]
        min_delay: Duration,
        #[serde(with = "duration_millis")]
        max_delay: Duration,
        #[serde(default)]
        ramp_attempts: Option<u32>,
    },

    /// Constant delay, see [`FixedScheduler`]
    Fixed {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },

    /// Exponential backoff, see [`ExponentialScheduler`]
    Exponential {
        #[serde(with = "duration_millis")]
        initial_interval: Duration,
        #[serde(with = "duration_millis")]
        max_interval: Duration,
        #[serde(default = "default_coefficient")]
        backoff_coefficient: f64,
        #[serde(default = "default_jitter")]
        jitter: f64,
    },
}

fn default_coefficient() -> f64 {
    2.0
}

/// Same jitter as [`ExponentialScheduler::new`]
fn default_jitter() -> f64 {
    0.1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::Static {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            ramp_attempts: None,
        }
    }
}

impl SchedulerConfig {
    /// Check the bounds
    pub fn validate(&self) -> Result<(), TaskError> {
        match self {
            Self::Static {
                min_delay,
                max_delay,
                ..
            } if max_delay < min_delay => Err(TaskError::InvalidConfig(
                "min_delay must not exceed max_delay".into(),
            )),
            Self::Exponential {
                initial_interval,
                max_interval,
                ..
            } if max_interval < initial_interval => Err(TaskError::InvalidConfig(
                "initial_interval must not exceed max_interval".into(),
            )),
            Self::Exponential {
                backoff_coefficient,
                ..
            } if !backoff_coefficient.is_finite() || *backoff_coefficient < 1.0 => Err(
                TaskError::InvalidConfig("backoff_coefficient must be >= 1.0".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Validate and instantiate the policy
    pub fn build(&self) -> Result<Arc<dyn Scheduler>, TaskError> {
        self.validate()?;

        let scheduler: Arc<dyn Scheduler> = match self {
            Self::Static {
                min_delay,
                max_delay,
                ramp_attempts,
            } => {
                let mut s = StaticScheduler::new(*min_delay, *max_delay);
                if let Some(ramp) = ramp_attempts {
                    s = s.with_ramp_attempts(*ramp);
                }
                Arc::new(s)
            }
            Self::Fixed { delay } => Arc::new(FixedScheduler::new(*delay)),
            Self::Exponential {
                initial_interval,
                max_interval,
                backoff_coefficient,
                jitter,
            } => Arc::new(
                ExponentialScheduler::new(*initial_interval, *max_interval)
                    .with_backoff_coefficient(*backoff_coefficient)
                    .with_jitter(*jitter),
            ),
        };

        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_static() {
        let scheduler = SchedulerConfig::default().build().unwrap();

        assert_eq!(scheduler.min_delay(), Duration::from_millis(100));
        assert_eq!(scheduler.max_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let config = SchedulerConfig::Static {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            ramp_attempts: None,
        };

        assert!(matches!(
            config.build(),
            Err(TaskError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let config = SchedulerConfig::Exponential {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            backoff_coefficient: 0.5,
            jitter: 0.0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_exponential_defaults() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{"policy": "exponential", "initial_interval": 500, "max_interval": 8000}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            SchedulerConfig::Exponential {
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(8),
                backoff_coefficient: 2.0,
                jitter: 0.1,
            }
        );

        let scheduler = config.build().unwrap();
        let delay = scheduler.next_delay(2);
        assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1100));
    }

    #[test]
    fn test_config_jitter_matches_constructor_default() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{"policy": "exponential", "initial_interval": 1000, "max_interval": 60000}"#,
        )
        .unwrap();

        let SchedulerConfig::Exponential { jitter, .. } = config else {
            panic!("expected exponential config");
        };
        let direct = ExponentialScheduler::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(jitter, direct.jitter);
    }

    #[test]
    fn test_fixed_round_trip() {
        let config = SchedulerConfig::Fixed {
            delay: Duration::from_millis(750),
        };

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"policy":"fixed","delay":750}"#);
        assert_eq!(serde_json::from_str::<SchedulerConfig>(&json).unwrap(), config);
    }
}
