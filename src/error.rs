//! Error types for taskforge.

use std::any::Any;

use thiserror::Error;

/// Errors surfaced by pools, the queue, and the network front-end.
///
/// Submission-time errors (`SubmitAfterStop`, `QueueFull`) are returned
/// synchronously from `submit`. Execution-time failures travel through the
/// task's [`TaskHandle`](crate::task::TaskHandle) as a [`TaskError`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Pool or queue constructed with invalid parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Submit was called on a pool that is shutting down.
    #[error("submit on a stopped pool")]
    SubmitAfterStop,

    /// The bounded queue stayed full for the whole submit retry window.
    #[error("queue full after {0} retries")]
    QueueFull(usize),

    /// A task signalled failure; carried by task handles, never thrown at submit.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Malformed or oversized frame on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for taskforge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single task, preserving the cause as a message.
///
/// Delivered through the task's handle exactly once. Workers never terminate
/// on task failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task failed: {message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    /// Create a task error from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Derive a task error from a caught panic payload.
    ///
    /// `&str` and `String` payloads (the common `panic!` cases) keep their
    /// text; anything else becomes an opaque marker.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self { message }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}
