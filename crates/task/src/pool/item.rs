//! Work item definitions

use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskCx, Poll};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::WaitForCancellationFuture;

use crate::context::Context;

/// Failure reported by a work item
///
/// The item classifies its own failure: retryable errors go back through the
/// pool's scheduler, fatal ones retire the item immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether another attempt may succeed
    pub retryable: bool,
}

impl WorkError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
        }
    }

    /// Create a fatal (non-retryable) error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(kind) => write!(f, "[{kind}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WorkError {}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

/// Result of one execution of a work item
pub type WorkResult = Result<(), WorkError>;

/// Context handed to a work item while it executes
///
/// Execution is never preempted; long-running items should watch
/// [`cancelled`](Self::cancelled) and return early.
#[derive(Debug, Clone)]
pub struct WorkContext {
    ctx: Context,
    attempt: u32,
    max_attempts: u32,
}

impl WorkContext {
    pub(crate) fn new(ctx: Context, attempt: u32, max_attempts: u32) -> Self {
        Self {
            ctx,
            attempt,
            max_attempts,
        }
    }

    /// Current attempt number (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Maximum attempts allowed by the pool
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a retryable failure now would retire the item
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Whether the worker running this item was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_done()
    }

    /// Resolves when the worker running this item is cancelled
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = do_work() => result,
    ///     _ = ctx.cancelled() => Err(WorkError::fatal("cancelled")),
    /// }
    /// ```
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.ctx.done()
    }

    /// The worker's own context
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

/// A unit of work keyed by `K`
///
/// The pool never runs two items with equal keys at the same time.
///
/// # Example
///
/// ```ignore
/// struct SyncCell { cell_id: u64 }
///
/// #[async_trait]
/// impl WorkItem<u64> for SyncCell {
///     fn key(&self) -> u64 {
///         self.cell_id
///     }
///
///     async fn work(&self, ctx: &WorkContext) -> WorkResult {
///         push_cell(self.cell_id).await.map_err(|e| WorkError::retryable(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait WorkItem<K>: Send + Sync + 'static {
    /// Exclusivity key
    fn key(&self) -> K;

    /// Execute one attempt
    async fn work(&self, ctx: &WorkContext) -> WorkResult;
}

/// Work item backed by a closure, see [`work_fn`]
pub struct FnItem<K, F> {
    key: K,
    f: F,
}

/// Build a work item from a key and an async closure
///
/// The closure runs once per attempt.
pub fn work_fn<K, F, Fut>(key: K, f: F) -> FnItem<K, F>
where
    K: Clone + Send + Sync + 'static,
    F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    FnItem { key, f }
}

#[async_trait]
impl<K, F, Fut> WorkItem<K> for FnItem<K, F>
where
    K: Clone + Send + Sync + 'static,
    F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkResult> + Send + 'static,
{
    fn key(&self) -> K {
        self.key.clone()
    }

    async fn work(&self, ctx: &WorkContext) -> WorkResult {
        (self.f)(ctx.clone()).await
    }
}

/// Final state of a submitted item
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    /// The item succeeded
    Completed { attempts: u32 },

    /// Fatal failure, or retryable failures until attempts ran out
    Failed { error: WorkError, attempts: u32 },

    /// The pool closed before the item could finish; it will not run again
    Discarded,
}

impl WorkOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Number of executions, zero for discarded items
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts } | Self::Failed { attempts, .. } => *attempts,
            Self::Discarded => 0,
        }
    }
}

/// Resolves to the [`WorkOutcome`] of a submitted item
///
/// Dropping the handle does not cancel the item.
#[derive(Debug)]
pub struct WorkHandle {
    rx: oneshot::Receiver<WorkOutcome>,
}

impl WorkHandle {
    pub(crate) fn new(rx: oneshot::Receiver<WorkOutcome>) -> Self {
        Self { rx }
    }

    /// Outcome if the item already settled
    pub fn try_outcome(&mut self) -> Option<WorkOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(WorkOutcome::Discarded),
        }
    }
}

impl Future for WorkHandle {
    type Output = WorkOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskCx<'_>) -> Poll<Self::Output> {
        // A dropped sender means the queued item was thrown away
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(WorkOutcome::Discarded))
    }
}
