//! Keyed worker pool
//!
//! This module provides:
//! - [`KeyedWorkerPool`] - Fixed set of workers with per-key mutual exclusion
//! - [`WorkItem`] / [`work_fn`] - Units of work and their exclusivity key
//! - [`WorkHandle`] - Resolves to the item's [`WorkOutcome`]
//! - [`PoolConfig`] - Worker count, attempt limit and retry policy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    KeyedWorkerPool (Context)                 │
//! │                                                              │
//! │   add() ──▶ ┌──────────────── KeyedQueue ────────────────┐   │
//! │             │ key A: [retry@t+200ms] [item] [item]       │   │
//! │             │ key B: [item]                              │   │
//! │             │ in flight: { C }                           │   │
//! │             └────────────────────┬───────────────────────┘   │
//! │                                  │ take_next (one lock)      │
//! │         ┌────────────────────────┼──────────────────┐        │
//! │   ┌─────▼─────┐            ┌─────▼─────┐      ┌─────▼─────┐  │
//! │   │ worker-0  │            │ worker-1  │ ...  │ worker-N  │  │
//! │   └───────────┘            └───────────┘      └───────────┘  │
//! │    retryable failure ──▶ Scheduler::next_delay ──▶ lane head │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A key is in flight from the moment a worker claims its item until that
//! execution settles. Retries go back to the head of their key's lane, so an
//! item submitted after a failure still waits for the retry.

mod config;
mod item;
mod keyed;
mod queue;
mod worker;

pub use config::PoolConfig;
pub use item::{
    work_fn, FnItem, WorkContext, WorkError, WorkHandle, WorkItem, WorkOutcome, WorkResult,
};
pub use keyed::{KeyedWorkerPool, PoolStats};
