//! Context node implementation

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use super::ContextState;
use crate::error::{panic_message, StopOutcome, TaskError};

type ClosingHook = Box<dyn FnOnce() + Send + 'static>;

/// A node in the cancellable execution tree
///
/// `Context` is a cheap handle (`Arc` inside); clones refer to the same node.
/// A parent keeps a handle to each child it started until that child closes.
///
/// Two signals flow downward:
/// - **done** ([`done`](Self::done)): hard cancellation, fired by
///   [`close`](Self::close) on this node or any ancestor
/// - **stop requested** ([`stop_requested`](Self::stop_requested)): "finish
///   what you have, take nothing new", fired by
///   [`graceful_stop`](Self::graceful_stop) and by every hard close
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    label: String,
    parent: Option<Weak<Inner>>,
    cancel: CancellationToken,
    stop: CancellationToken,
    state_tx: watch::Sender<ContextState>,
    /// Shared by every node of one tree; pinged whenever a body finishes or
    /// the shape of the tree changes
    tree: Arc<Notify>,
    lifecycle: Mutex<Lifecycle>,
}

struct Lifecycle {
    state: ContextState,
    close_requested: bool,
    body_running: bool,
    children: HashMap<Uuid, Context>,
    idle_since: Option<Instant>,
    error: Option<TaskError>,
    closing_hooks: Vec<ClosingHook>,
}

impl Context {
    /// Create a parentless, running scope
    pub fn root(label: impl Into<String>) -> Self {
        let ctx = Self::new_node(label.into(), None, ContextState::Running, false);
        debug!(label = %ctx.inner.label, context_id = %ctx.inner.id, "Created root context");
        ctx
    }

    fn new_node(
        label: String,
        parent: Option<&Context>,
        initial: ContextState,
        body_running: bool,
    ) -> Self {
        let (cancel, stop, tree, parent) = match parent {
            Some(p) => (
                p.inner.cancel.child_token(),
                p.inner.stop.child_token(),
                Arc::clone(&p.inner.tree),
                Some(Arc::downgrade(&p.inner)),
            ),
            None => (
                CancellationToken::new(),
                CancellationToken::new(),
                Arc::new(Notify::new()),
                None,
            ),
        };
        let (state_tx, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                id: Uuid::now_v7(),
                label,
                parent,
                cancel,
                stop,
                state_tx,
                tree,
                lifecycle: Mutex::new(Lifecycle {
                    state: initial,
                    close_requested: false,
                    body_running,
                    children: HashMap::new(),
                    idle_since: Some(Instant::now()),
                    error: None,
                    closing_hooks: Vec::new(),
                }),
            }),
        }
    }

    /// Start a child that runs `body` on the current tokio runtime
    ///
    /// The child is registered with this node before `body` is polled, so a
    /// close racing with this call always reaches it. If the child is closed
    /// before its body gets scheduled, the body never runs.
    ///
    /// When `body` returns `Ok` the child closes itself (its work is over).
    /// An `Err` or a panic closes it with the error attached, visible through
    /// [`err`](Self::err) and [`closed`](Self::closed).
    ///
    /// # Errors
    ///
    /// [`TaskError::Closing`] if this node is closing or a stop was requested.
    pub fn start_child<F, Fut>(&self, label: impl Into<String>, body: F) -> Result<Context, TaskError>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let child = self.attach(label.into(), ContextState::Idle, true)?;

        let node = child.clone();
        let span = tracing::debug_span!(
            "context",
            label = %node.inner.label,
            context_id = %node.inner.id
        );

        tokio::spawn(
            async move {
                let result = if node.begin_body() {
                    let ctx = node.clone();
                    match AssertUnwindSafe(async move { body(ctx).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(payload) => Err(anyhow::anyhow!(
                            "panicked: {}",
                            panic_message(payload.as_ref())
                        )),
                    }
                } else {
                    Ok(())
                };
                node.finish_body(result);
            }
            .instrument(span),
        );

        Ok(child)
    }

    /// Start a child without a body
    ///
    /// The scope is running immediately and stays open until it (or an
    /// ancestor) is closed. Sessions, app instances and pools live in scopes.
    ///
    /// # Errors
    ///
    /// [`TaskError::Closing`] if this node is closing or a stop was requested.
    pub fn start_scope(&self, label: impl Into<String>) -> Result<Context, TaskError> {
        self.attach(label.into(), ContextState::Running, false)
    }

    fn attach(
        &self,
        label: String,
        initial: ContextState,
        body_running: bool,
    ) -> Result<Context, TaskError> {
        let mut lc = self.inner.lifecycle.lock();
        if lc.close_requested || lc.state.is_closing() || self.inner.stop.is_cancelled() {
            return Err(TaskError::Closing);
        }

        let child = Context::new_node(label, Some(self), initial, body_running);
        lc.children.insert(child.inner.id, child.clone());
        lc.idle_since = None;
        drop(lc);

        debug!(
            parent = %self.inner.label,
            label = %child.inner.label,
            context_id = %child.inner.id,
            "Started child context"
        );
        self.inner.tree.notify_waiters();
        Ok(child)
    }

    fn begin_body(&self) -> bool {
        let mut lc = self.inner.lifecycle.lock();
        if lc.close_requested {
            return false;
        }
        self.advance(&mut lc, ContextState::Running);
        true
    }

    fn finish_body(&self, result: anyhow::Result<()>) {
        {
            let mut lc = self.inner.lifecycle.lock();
            lc.body_running = false;
            if let Err(err) = &result {
                if lc.error.is_none() {
                    lc.error = Some(TaskError::failed(&self.inner.label, err));
                }
            }
        }

        match &result {
            Ok(()) => debug!(label = %self.inner.label, "Context body finished"),
            Err(err) => warn!(
                label = %self.inner.label,
                context_id = %self.inner.id,
                error = %format!("{err:#}"),
                "Context body failed"
            ),
        }

        self.inner.tree.notify_waiters();
        self.close();
        self.try_finalize();
    }

    /// Hard-cancel this node and every descendant
    ///
    /// Moves the whole subtree to Closing, then fires the done signal, runs
    /// closing hooks and returns without waiting. A descendant that observes
    /// the signal already reads Closing. The node reports Closed once its body
    /// and all children are gone. Calling it again is a no-op.
    pub fn close(&self) {
        let mut marked = Vec::new();
        self.mark_closing(&mut marked);
        if marked.is_empty() {
            return;
        }

        // Descendant tokens are children of ours
        self.inner.stop.cancel();
        self.inner.cancel.cancel();

        let nodes: Vec<Context> = marked
            .into_iter()
            .map(|(node, hooks)| {
                for hook in hooks {
                    node.run_hook(hook);
                }
                node
            })
            .collect();

        // Marked parent first, so finalize from the leaves up
        for node in nodes.iter().rev() {
            node.try_finalize();
        }
    }

    /// Pre-order walk flagging every node not already closing
    fn mark_closing(&self, marked: &mut Vec<(Context, Vec<ClosingHook>)>) {
        let children = {
            let mut lc = self.inner.lifecycle.lock();
            if lc.close_requested {
                return;
            }
            lc.close_requested = true;
            self.advance(&mut lc, ContextState::Closing);
            marked.push((self.clone(), std::mem::take(&mut lc.closing_hooks)));
            lc.children.values().cloned().collect::<Vec<_>>()
        };

        debug!(
            label = %self.inner.label,
            context_id = %self.inner.id,
            children = children.len(),
            "Closing context"
        );

        for child in &children {
            child.mark_closing(marked);
        }
    }

    fn run_hook(&self, hook: ClosingHook) {
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(hook)) {
            warn!(
                label = %self.inner.label,
                panic = %panic_message(payload.as_ref()),
                "Closing hook panicked"
            );
        }
    }

    fn try_finalize(&self) {
        let parent = {
            let mut lc = self.inner.lifecycle.lock();
            if !lc.close_requested
                || lc.state.is_closed()
                || lc.body_running
                || !lc.children.is_empty()
            {
                return;
            }
            self.advance(&mut lc, ContextState::Closed);
            self.inner.parent.as_ref().and_then(Weak::upgrade)
        };

        debug!(label = %self.inner.label, context_id = %self.inner.id, "Context closed");
        self.inner.tree.notify_waiters();

        if let Some(parent) = parent {
            Context { inner: parent }.remove_child(self.inner.id);
        }
    }

    fn remove_child(&self, id: Uuid) {
        {
            let mut lc = self.inner.lifecycle.lock();
            lc.children.remove(&id);
            if lc.children.is_empty() {
                lc.idle_since = Some(Instant::now());
            }
        }
        self.inner.tree.notify_waiters();
        self.try_finalize();
    }

    fn advance(&self, lc: &mut Lifecycle, next: ContextState) {
        if next > lc.state {
            lc.state = next;
            self.inner.state_tx.send_replace(next);
        }
    }

    fn is_drained(&self) -> bool {
        let children: Vec<Context> = {
            let lc = self.inner.lifecycle.lock();
            if lc.body_running {
                return false;
            }
            lc.children.values().cloned().collect()
        };
        children.iter().all(Context::is_drained)
    }

    /// Ask the subtree to finish its current work and wait until it has
    ///
    /// Fires the stop-requested signal (not the done signal) and waits until
    /// no body in the subtree is executing. On [`StopOutcome::Drained`] the
    /// node is Closing and the caller should follow up with
    /// [`close`](Self::close). If a hard close races in, this returns
    /// [`StopOutcome::Cancelled`] once the node is Closed.
    #[instrument(skip(self), fields(label = %self.inner.label, context_id = %self.inner.id))]
    pub async fn graceful_stop(&self) -> StopOutcome {
        info!("Graceful stop requested");
        self.inner.stop.cancel();

        loop {
            let notified = self.inner.tree.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.cancel.is_cancelled() {
                let _ = self.closed().await;
                debug!("Graceful stop overtaken by close");
                return StopOutcome::Cancelled;
            }

            if self.is_drained() {
                {
                    let mut lc = self.inner.lifecycle.lock();
                    self.advance(&mut lc, ContextState::Closing);
                }
                info!("Context drained");
                return StopOutcome::Drained;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.inner.cancel.cancelled() => {}
            }
        }
    }

    /// [`graceful_stop`](Self::graceful_stop) with a drain deadline
    ///
    /// When the deadline passes the node is hard closed and
    /// [`StopOutcome::TimedOut`] is returned right away. Bodies that ignore
    /// cancellation may still be running; [`closed`](Self::closed) waits for
    /// them.
    pub async fn graceful_stop_timeout(&self, timeout: Duration) -> StopOutcome {
        match tokio::time::timeout(timeout, self.graceful_stop()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    label = %self.inner.label,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Graceful stop timed out, closing"
                );
                self.close();
                StopOutcome::TimedOut
            }
        }
    }

    /// Wait until the node is Closed and return its terminal outcome
    ///
    /// Every call returns the same outcome.
    pub async fn closed(&self) -> Result<(), TaskError> {
        let mut rx = self.inner.state_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|state| state.is_closed()).await;
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// [`close`](Self::close) followed by [`closed`](Self::closed)
    pub async fn close_and_wait(&self) -> Result<(), TaskError> {
        self.close();
        self.closed().await
    }

    /// Register a callback that runs once when this node starts closing
    ///
    /// Runs immediately if the node is already closing.
    pub fn on_closing(&self, hook: impl FnOnce() + Send + 'static) {
        let hook: ClosingHook = Box::new(hook);
        let mut lc = self.inner.lifecycle.lock();
        if lc.close_requested {
            drop(lc);
            self.run_hook(hook);
        } else {
            lc.closing_hooks.push(hook);
        }
    }

    /// Close this node once it has had no children for `delay`
    ///
    /// Useful for app instances that should go away shortly after their last
    /// pin is released.
    pub fn close_when_idle(&self, delay: Duration) {
        let ctx = self.clone();
        tokio::spawn(async move {
            loop {
                let notified = ctx.inner.tree.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let idle_since = {
                    let lc = ctx.inner.lifecycle.lock();
                    if lc.close_requested {
                        return;
                    }
                    if lc.children.is_empty() {
                        lc.idle_since
                    } else {
                        None
                    }
                };

                match idle_since {
                    Some(since) if since.elapsed() >= delay => {
                        debug!(label = %ctx.inner.label, "Context idle, closing");
                        ctx.close();
                        return;
                    }
                    Some(since) => {
                        tokio::select! {
                            _ = tokio::time::sleep_until(since + delay) => {}
                            _ = &mut notified => {}
                            _ = ctx.inner.cancel.cancelled() => return,
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = &mut notified => {}
                            _ = ctx.inner.cancel.cancelled() => return,
                        }
                    }
                }
            }
        });
    }

    /// Resolves when hard cancellation reaches this node
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    /// Whether hard cancellation reached this node
    pub fn is_done(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves when a graceful stop or a hard close reaches this node
    pub fn stop_requested(&self) -> WaitForCancellationFuture<'_> {
        self.inner.stop.cancelled()
    }

    /// Whether a graceful stop or a hard close reached this node
    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// A token that fires together with [`done`](Self::done)
    ///
    /// Cancelling the returned token does not close this node.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ContextState {
        self.inner.lifecycle.lock().state
    }

    /// Error attached by a failed body, if any
    pub fn err(&self) -> Option<TaskError> {
        self.inner.lifecycle.lock().error.clone()
    }

    /// Unique, time ordered ID
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Human-readable label
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The node that started this one, while it is still alive
    pub fn parent(&self) -> Option<Context> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Context { inner })
    }

    /// Number of children not yet closed
    pub fn child_count(&self) -> usize {
        self.inner.lifecycle.lock().children.len()
    }

    /// Snapshot of the children not yet closed
    pub fn children(&self) -> Vec<Context> {
        self.inner.lifecycle.lock().children.values().cloned().collect()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}
