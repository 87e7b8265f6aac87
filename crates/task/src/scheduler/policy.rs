//! Built-in retry policies

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Scheduler;
use crate::duration_millis;

/// Default number of attempts over which [`StaticScheduler`] ramps up
const DEFAULT_RAMP_ATTEMPTS: u32 = 10;

fn clamp(delay: Duration, min: Duration, max: Duration) -> Duration {
    delay.max(min).min(max)
}

/// Linear ramp between two bounds
///
/// The first retry waits `min_delay`; each further attempt adds an equal
/// step until `max_delay` is reached after `ramp_attempts` retries, after
/// which the delay stays at `max_delay`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticScheduler {
    /// Delay after the first failed attempt
    #[serde(with = "duration_millis")]
    pub min_delay: Duration,

    /// Ceiling for every delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Retries needed to climb from `min_delay` to `max_delay`
    pub ramp_attempts: u32,
}

impl StaticScheduler {
    /// Create a scheduler bounded by `[min_delay, max_delay]`
    ///
    /// A `max_delay` below `min_delay` is raised to `min_delay`.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            ramp_attempts: DEFAULT_RAMP_ATTEMPTS,
        }
    }

    /// Set how many retries the ramp spans
    pub fn with_ramp_attempts(mut self, attempts: u32) -> Self {
        self.ramp_attempts = attempts.max(1);
        self
    }
}

impl Scheduler for StaticScheduler {
    fn next_delay(&self, attempt: u32) -> Duration {
        let ramp = self.ramp_attempts.max(1);
        let step = attempt.max(1).saturating_sub(1).min(ramp);
        let span = self.max_delay.saturating_sub(self.min_delay);
        let delay = self.min_delay + span.mul_f64(f64::from(step) / f64::from(ramp));

        clamp(delay, self.min_delay, self.max_delay)
    }

    fn min_delay(&self) -> Duration {
        self.min_delay
    }

    fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

/// Same delay for every attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedScheduler {
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

impl FixedScheduler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Scheduler for FixedScheduler {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn min_delay(&self) -> Duration {
        self.delay
    }

    fn max_delay(&self) -> Duration {
        self.delay
    }
}

/// Exponential backoff with jitter to avoid thundering herd
///
/// ```
/// use amp_task::scheduler::{ExponentialScheduler, Scheduler};
/// use std::time::Duration;
///
/// let scheduler = ExponentialScheduler::new(Duration::from_secs(1), Duration::from_secs(60))
///     .with_jitter(0.0);
///
/// // First retry after 1 second, then 2, then 4, ...
/// assert_eq!(scheduler.next_delay(1), Duration::from_secs(1));
/// assert_eq!(scheduler.next_delay(3), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExponentialScheduler {
    /// Delay after the first failed attempt (and the lower bound)
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between attempts
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for doubling)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means ±10% randomness
    pub jitter: f64,
}

impl Default for ExponentialScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl ExponentialScheduler {
    /// Doubling backoff with 10% jitter
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval: max_interval.max(initial_interval),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

impl Scheduler for ExponentialScheduler {
    fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let base = self.initial_interval.as_secs_f64()
            * self
                .backoff_coefficient
                .powi(exponent.min(i32::MAX as u32) as i32);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        clamp(
            Duration::from_secs_f64(jittered),
            self.initial_interval,
            self.max_interval,
        )
    }

    fn min_delay(&self) -> Duration {
        self.initial_interval
    }

    fn max_delay(&self) -> Duration {
        self.max_interval
    }
}
