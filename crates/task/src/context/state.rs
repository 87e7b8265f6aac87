//! Context lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Context`](super::Context)
///
/// # State Machine
///
/// ```text
/// ┌──────┐  body starts  ┌─────────┐  close / parent close  ┌─────────┐  children closed  ┌────────┐
/// │ Idle │ ────────────► │ Running │ ─────────────────────► │ Closing │ ────────────────► │ Closed │
/// └──────┘               └─────────┘                         └─────────┘                   └────────┘
/// ```
///
/// States only move forward; the derived ordering follows the diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextState {
    /// Registered with its parent, body not started yet
    Idle,

    /// Body (if any) is executing
    Running,

    /// Cancellation delivered, waiting for children and body to finish
    Closing,

    /// Terminal
    Closed,
}

impl ContextState {
    /// Whether the node refuses new children and work
    pub fn is_closing(self) -> bool {
        self >= Self::Closing
    }

    /// Whether this is the terminal state
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}
