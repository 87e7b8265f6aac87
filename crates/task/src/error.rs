//! Lifecycle errors

/// Errors returned by context and pool lifecycle operations
///
/// Cloneable so a node's terminal outcome can be handed to every caller of
/// [`Context::closed`](crate::Context::closed).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The node (or pool) is closing and refuses new work
    #[error("context is closing")]
    Closing,

    /// Rejected at construction
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A context body returned an error or panicked
    #[error("task '{label}' failed: {message}")]
    Failed {
        /// Label of the failing context
        label: String,
        /// Rendered error chain or panic payload
        message: String,
    },
}

impl TaskError {
    /// Build a `Failed` error from a body error
    pub(crate) fn failed(label: &str, err: &anyhow::Error) -> Self {
        Self::Failed {
            label: label.to_string(),
            message: format!("{err:#}"),
        }
    }

    /// Whether the caller may simply stop submitting work
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing)
    }
}

/// Result of a graceful stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Every body in the subtree finished on its own
    Drained,
    /// A hard close raced in; the node is already closed
    Cancelled,
    /// The drain deadline passed and the node was hard closed
    TimedOut,
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drained => write!(f, "drained"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Extract a printable message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
