//! # AMP Task Substrate
//!
//! Structured concurrency for long-lived platform entities.
//!
//! ## Features
//!
//! - **Context tree**: hierarchical, cancellable execution scopes with
//!   graceful and hard shutdown
//! - **Keyed worker pool**: at most one execution per key at any instant,
//!   whatever the worker count
//! - **Retry scheduling**: pluggable delay policies (static ramp, fixed,
//!   exponential with jitter)
//!
//! Everything is in memory. Queued items do not survive a process restart.
//!
//! ## Example
//!
//! ```no_run
//! use amp_task::prelude::*;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let host = Context::root("host");
//! let pool = KeyedWorkerPool::<String>::from_config(&host, PoolConfig::new("cells"))?;
//!
//! let handle = pool.add(work_fn("cell-7".to_string(), |ctx: WorkContext| async move {
//!     if ctx.attempt() < 2 {
//!         return Err(WorkError::retryable("peer not ready"));
//!     }
//!     Ok(())
//! }))?;
//!
//! assert_eq!(handle.await.attempts(), 2);
//! host.close_and_wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod pool;
pub mod scheduler;

mod duration_millis;

/// Prelude for common imports
pub mod prelude {
    pub use crate::context::{Context, ContextState};
    pub use crate::error::{StopOutcome, TaskError};
    pub use crate::pool::{
        work_fn, KeyedWorkerPool, PoolConfig, WorkContext, WorkError, WorkHandle, WorkItem,
        WorkOutcome, WorkResult,
    };
    pub use crate::scheduler::{Scheduler, SchedulerConfig, StaticScheduler};
}

// Re-export key types at crate root
pub use context::{Context, ContextState};
pub use error::{StopOutcome, TaskError};
pub use pool::{
    work_fn, FnItem, KeyedWorkerPool, PoolConfig, PoolStats, WorkContext, WorkError, WorkHandle,
    WorkItem, WorkOutcome, WorkResult,
};
pub use scheduler::{
    ExponentialScheduler, FixedScheduler, Scheduler, SchedulerConfig, StaticScheduler,
};
