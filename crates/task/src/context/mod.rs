//! Structured concurrency tree
//!
//! Every long-lived unit (host, session, app instance, pin request, worker)
//! is a [`Context`]: a node owned by exactly one parent, carrying a hard
//! cancellation signal and a softer "stop requested" signal that both flow
//! from parent to children.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────┐
//!                │  root: host  │
//!                └──────┬───────┘
//!          ┌────────────┴────────────┐
//!   ┌──────▼───────┐          ┌──────▼───────┐
//!   │  session #1  │          │  session #2  │
//!   └──────┬───────┘          └──────────────┘
//!   ┌──────▼───────┐
//!   │ pool: cells  │   close() here cancels both workers,
//!   └──┬────────┬──┘   then reports Closed once they are gone
//!   ┌──▼──┐  ┌──▼──┐
//!   │ w.0 │  │ w.1 │
//!   └─────┘  └─────┘
//! ```
//!
//! A node only reaches [`ContextState::Closed`] after every child it owns has
//! closed, and children are detached from their parent only once closed. A
//! parent therefore never reports Closed while a descendant is still running.
//!
//! # Example
//!
//! ```no_run
//! use amp_task::Context;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let host = Context::root("host");
//! let session = host.start_scope("session")?;
//!
//! session.start_child("pin", |ctx| async move {
//!     // Serve until the session goes away
//!     ctx.done().await;
//!     Ok(())
//! })?;
//!
//! host.close_and_wait().await?;
//! # Ok(())
//! # }
//! ```

mod node;
mod state;

pub use node::Context;
pub use state::ContextState;
