//! Error types for the framework layer.

use thiserror::Error;

use crate::scheduler::TaskId;

/// A failure reported by a command handler or scheduled task.
///
/// Handler errors are caught where the handler is invoked, logged, and never
/// propagated further: one faulty handler cannot stop dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Creates a failure from anything printable.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }

    /// Builds a panic error from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// Errors returned by [`Scheduler`](crate::Scheduler) management calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// No task with this id is scheduled (it may have fired or been cancelled).
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
}

/// Result type for handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
