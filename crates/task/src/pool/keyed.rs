//! Keyed worker pool

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::config::PoolConfig;
use super::item::{WorkHandle, WorkItem, WorkOutcome};
use super::queue::KeyedQueue;
use super::worker;
use crate::context::Context;
use crate::error::{StopOutcome, TaskError};
use crate::scheduler::Scheduler;

/// A queued item plus the channel its outcome goes out on
pub(crate) struct Job<K> {
    pub(crate) item: Arc<dyn WorkItem<K>>,
    pub(crate) attempts: u32,
    done: oneshot::Sender<WorkOutcome>,
}

impl<K> Job<K> {
    pub(crate) fn finish(self, outcome: WorkOutcome) {
        // The producer may have dropped its handle
        let _ = self.done.send(outcome);
    }
}

/// State shared between the pool handle and its workers
pub(crate) struct Shared<K> {
    pub(crate) queue: Mutex<KeyedQueue<K, Job<K>>>,
    pub(crate) notify: Notify,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) max_attempts: u32,
}

/// Snapshot of pool load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Items waiting in the queue, delayed retries included
    pub queued: usize,
    /// Queued items still waiting out a retry delay
    pub delayed: usize,
    /// Keys currently executing
    pub in_flight: usize,
    /// Workers still running
    pub workers: usize,
}

/// Worker pool that never runs two items with the same key at once
///
/// The pool owns a [`Context`] (a child of the one it was started under) and
/// runs each worker as a child of that context, so closing any ancestor
/// cancels the workers and discards whatever is still queued.
///
/// # Example
///
/// ```no_run
/// use amp_task::{work_fn, Context, KeyedWorkerPool, PoolConfig, WorkContext};
///
/// # async fn example() -> anyhow::Result<()> {
/// let root = Context::root("host");
/// let pool = KeyedWorkerPool::<u64>::from_config(&root, PoolConfig::new("cells"))?;
///
/// let handle = pool.add(work_fn(42u64, |_ctx: WorkContext| async move { Ok(()) }))?;
/// assert!(handle.await.is_completed());
///
/// pool.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct KeyedWorkerPool<K> {
    ctx: Context,
    shared: Arc<Shared<K>>,
    config: PoolConfig,
}

impl<K> KeyedWorkerPool<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Start a pool under `parent`
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidConfig`] for a bad configuration,
    /// [`TaskError::Closing`] if `parent` no longer accepts children.
    #[instrument(skip_all, fields(label = %config.label, workers = config.worker_count))]
    pub fn start(
        parent: &Context,
        config: PoolConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, TaskError> {
        config.validate()?;
        let ctx = parent.start_scope(config.label.clone())?;
        Self::spawn(ctx, config, scheduler)
    }

    /// Start a pool under a fresh root context
    pub fn start_root(config: PoolConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self, TaskError> {
        config.validate()?;
        let ctx = Context::root(config.label.clone());
        Self::spawn(ctx, config, scheduler)
    }

    /// Start a pool whose scheduler is built from `config.scheduler`
    pub fn from_config(parent: &Context, config: PoolConfig) -> Result<Self, TaskError> {
        let scheduler = config.scheduler.build()?;
        Self::start(parent, config, scheduler)
    }

    fn spawn(ctx: Context, config: PoolConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self, TaskError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(KeyedQueue::new()),
            notify: Notify::new(),
            scheduler,
            max_attempts: config.max_attempts,
        });

        // Anything still queued when the pool closes never runs
        let hook_shared = Arc::clone(&shared);
        let label = config.label.clone();
        ctx.on_closing(move || {
            let discarded = hook_shared.queue.lock().close();
            if !discarded.is_empty() {
                debug!(pool = %label, count = discarded.len(), "Discarding queued work");
            }
            for job in discarded {
                job.finish(WorkOutcome::Discarded);
            }
            hook_shared.notify.notify_waiters();
        });

        for n in 0..config.worker_count {
            let shared = Arc::clone(&shared);
            let spawned = ctx.start_child(format!("{}.worker-{n}", config.label), move |worker_ctx| {
                worker::run(worker_ctx, shared)
            });
            if let Err(e) = spawned {
                ctx.close();
                return Err(e);
            }
        }

        info!(
            pool = %config.label,
            workers = config.worker_count,
            max_attempts = config.max_attempts,
            "Keyed worker pool started"
        );

        Ok(Self { ctx, shared, config })
    }

    /// Queue an item behind any others with the same key
    ///
    /// # Errors
    ///
    /// [`TaskError::Closing`] once the pool is stopping or closed.
    pub fn add(&self, item: impl WorkItem<K>) -> Result<WorkHandle, TaskError> {
        self.add_arc(Arc::new(item))
    }

    /// [`add`](Self::add) for an item that is already shared
    pub fn add_arc(&self, item: Arc<dyn WorkItem<K>>) -> Result<WorkHandle, TaskError> {
        let key = item.key();
        let (tx, rx) = oneshot::channel();
        let job = Job {
            item,
            attempts: 0,
            done: tx,
        };

        {
            // Admission and the workers' exit check share this lock, so an
            // admitted item is always drained
            let mut queue = self.shared.queue.lock();
            if self.ctx.is_stop_requested() {
                queue.stop_admission();
            }
            if queue.push(key, job).is_err() {
                return Err(TaskError::Closing);
            }
        }
        self.shared.notify.notify_waiters();

        Ok(WorkHandle::new(rx))
    }

    /// Make a key whose head item is waiting out a retry delay eligible now
    ///
    /// Returns `false` if no delayed item is queued for `key`.
    pub fn force_retry(&self, key: &K) -> bool {
        let forced = self.shared.queue.lock().force_ready(key);
        if forced {
            debug!(pool = %self.config.label, ?key, "Forced retry");
            self.shared.notify.notify_waiters();
        }
        forced
    }

    /// Hard close: cancel workers and discard queued items
    ///
    /// Items already executing are not interrupted; they see cancellation
    /// through their [`WorkContext`](super::WorkContext).
    pub fn close(&self) {
        self.ctx.close();
    }

    /// Stop admission and wait until every queued item (retries included)
    /// has been worked off, then close
    pub async fn graceful_stop(&self) -> StopOutcome {
        let outcome = self.ctx.graceful_stop().await;
        self.ctx.close();
        outcome
    }

    /// [`graceful_stop`](Self::graceful_stop) with a deadline, after which
    /// remaining items are discarded
    ///
    /// Returns once the deadline passes even if an executing item ignores
    /// cancellation; [`closed`](Self::closed) waits for such items.
    pub async fn graceful_stop_timeout(&self, timeout: std::time::Duration) -> StopOutcome {
        let outcome = self.ctx.graceful_stop_timeout(timeout).await;
        self.ctx.close();
        outcome
    }

    /// Drain within the configured shutdown timeout and close
    ///
    /// Never waits longer than `shutdown_timeout`. On
    /// [`StopOutcome::TimedOut`] items still executing are left to finish in
    /// the background.
    pub async fn shutdown(&self) -> StopOutcome {
        let outcome = self.graceful_stop_timeout(self.config.shutdown_timeout).await;
        match outcome {
            StopOutcome::TimedOut => {
                warn!(
                    pool = %self.config.label,
                    in_flight = self.shared.queue.lock().in_flight(),
                    "Shutdown timed out, leaving executing items behind"
                );
            }
            // Nothing is executing any more, so this resolves promptly
            StopOutcome::Drained | StopOutcome::Cancelled => {
                if let Err(e) = self.ctx.closed().await {
                    warn!(pool = %self.config.label, error = %e, "Pool closed with error");
                }
            }
        }
        info!(pool = %self.config.label, %outcome, "Keyed worker pool shut down");
        outcome
    }

    /// Wait until the pool's context is closed
    pub async fn closed(&self) -> Result<(), TaskError> {
        self.ctx.closed().await
    }

    pub fn stats(&self) -> PoolStats {
        let queue = self.shared.queue.lock();
        PoolStats {
            queued: queue.queued(),
            delayed: queue.delayed(Instant::now()),
            in_flight: queue.in_flight(),
            workers: self.ctx.child_count(),
        }
    }

    /// The pool's own context
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }
}

impl<K> Debug for KeyedWorkerPool<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedWorkerPool")
            .field("label", &self.config.label)
            .field("workers", &self.config.worker_count)
            .field("state", &self.ctx.state())
            .finish()
    }
}
