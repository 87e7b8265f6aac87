//! Retry scheduling
//!
//! A [`Scheduler`] maps the number of attempts already made to the delay
//! before the next one. Policies are plain values with no mutable state, so a
//! single instance is shared by every retrying item of a pool.
//!
//! This module provides:
//! - [`StaticScheduler`] - Linear ramp from `min_delay` to `max_delay`
//! - [`FixedScheduler`] - Constant delay
//! - [`ExponentialScheduler`] - Exponential backoff with optional jitter
//! - [`SchedulerConfig`] - Serializable description that builds any of the above
//!
//! # Example
//!
//! ```
//! use amp_task::scheduler::{Scheduler, StaticScheduler};
//! use std::time::Duration;
//!
//! let scheduler = StaticScheduler::new(Duration::from_millis(100), Duration::from_secs(2));
//!
//! assert_eq!(scheduler.next_delay(1), Duration::from_millis(100));
//! assert!(scheduler.next_delay(50) <= Duration::from_secs(2));
//! ```

mod config;
mod policy;

use std::sync::Arc;
use std::time::Duration;

pub use config::SchedulerConfig;
pub use policy::{ExponentialScheduler, FixedScheduler, StaticScheduler};

/// Retry delay policy
///
/// Every implementation must return a delay within
/// `[min_delay(), max_delay()]` for any attempt, so callers can bound their
/// retry budget by `max_delay() * max_attempts`.
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    /// Delay before the next attempt, given the number of attempts made so
    /// far (1-based; 0 is treated as 1)
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Lower bound of [`next_delay`](Self::next_delay)
    fn min_delay(&self) -> Duration;

    /// Upper bound of [`next_delay`](Self::next_delay)
    fn max_delay(&self) -> Duration;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn next_delay(&self, attempt: u32) -> Duration {
        (**self).next_delay(attempt)
    }

    fn min_delay(&self) -> Duration {
        (**self).min_delay()
    }

    fn max_delay(&self) -> Duration {
        (**self).max_delay()
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Box<S> {
    fn next_delay(&self, attempt: u32) -> Duration {
        (**self).next_delay(attempt)
    }

    fn min_delay(&self) -> Duration {
        (**self).min_delay()
    }

    fn max_delay(&self) -> Duration {
        (**self).max_delay()
    }
}
