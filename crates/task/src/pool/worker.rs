//! Worker loop
//!
//! Each worker is a child context of the pool. It claims eligible items under
//! the pool lock, runs them with the lock released, then settles the outcome
//! (retire or reschedule) under the lock again.

use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::item::{WorkContext, WorkError, WorkOutcome};
use super::keyed::{Job, Shared};
use super::queue::Next;
use crate::context::Context;
use crate::error::panic_message;

pub(crate) async fn run<K>(ctx: Context, shared: Arc<Shared<K>>) -> anyhow::Result<()>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    debug!(worker = %ctx.label(), "Worker started");

    loop {
        if ctx.is_done() {
            break;
        }

        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = shared.queue.lock().take_next(Instant::now());

        match next {
            Next::Ready(key, job) => execute(&ctx, &shared, key, job).await,
            Next::WaitUntil(deadline) => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = ctx.done() => break,
                }
            }
            Next::Idle => {
                // Graceful stop: leave once nothing is left to drain. Closing
                // admission under the same lock keeps late adds out.
                {
                    let mut queue = shared.queue.lock();
                    if ctx.is_stop_requested() {
                        queue.stop_admission();
                    }
                    if !queue.is_admitting() && queue.is_empty() {
                        break;
                    }
                }
                let stopping = ctx.is_stop_requested();
                tokio::select! {
                    _ = &mut notified => {}
                    _ = ctx.done() => break,
                    _ = ctx.stop_requested(), if !stopping => {}
                }
            }
        }
    }

    debug!(worker = %ctx.label(), "Worker exited");
    // Peers may be waiting for the queue to drain
    shared.notify.notify_waiters();
    Ok(())
}

/// Outcome of one execution, decided under the pool lock
enum Settled<K> {
    Finished(Job<K>, WorkOutcome),
    Retrying,
    Dropped,
}

async fn execute<K>(ctx: &Context, shared: &Shared<K>, key: K, mut job: Job<K>)
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    job.attempts += 1;
    let attempt = job.attempts;
    let work_ctx = WorkContext::new(ctx.clone(), attempt, shared.max_attempts);

    trace!(?key, attempt, "Executing work item");

    let result = match AssertUnwindSafe(job.item.work(&work_ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(?key, attempt, panic = %message, "Work item panicked");
            Err(WorkError::fatal(format!("panicked: {message}")))
        }
    };

    let settled = {
        let mut queue = shared.queue.lock();
        queue.release(&key);

        match result {
            Ok(()) => Settled::Finished(job, WorkOutcome::Completed { attempts: attempt }),
            Err(error)
                if error.is_retryable()
                    && attempt < shared.max_attempts
                    && !queue.is_closed() =>
            {
                let delay = shared.scheduler.next_delay(attempt);
                debug!(
                    ?key,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    %error,
                    "Work item failed, scheduling retry"
                );
                match queue.push_retry(key.clone(), job, Instant::now() + delay) {
                    Ok(()) => Settled::Retrying,
                    Err(_job) => Settled::Dropped,
                }
            }
            Err(error) if error.is_retryable() && queue.is_closed() => Settled::Dropped,
            Err(error) => Settled::Finished(
                job,
                WorkOutcome::Failed {
                    error,
                    attempts: attempt,
                },
            ),
        }
    };

    // Wake peers blocked on this key or on the retry deadline
    shared.notify.notify_waiters();

    match settled {
        Settled::Finished(job, outcome) => {
            match &outcome {
                WorkOutcome::Failed { error, attempts } => {
                    warn!(?key, attempts, %error, "Work item failed")
                }
                _ => trace!(?key, attempt, "Work item completed"),
            }
            job.finish(outcome);
        }
        Settled::Retrying => {}
        Settled::Dropped => {
            debug!(?key, attempt, "Pool closed, dropping retry");
        }
    }
}
