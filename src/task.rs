//! Task erasure and the one-shot result channel.
//!
//! A submitted closure is boxed into a type-erased [`Task`] so heterogeneous
//! callables can share one queue. Its result travels back through a
//! single-producer single-consumer one-shot: the worker side writes exactly
//! once via [`TaskCompletion`], the caller side blocks in
//! [`TaskHandle::wait`] until the write lands.
//!
//! Dropping a `TaskHandle` does not cancel anything: the task still runs to
//! completion and the completion side quietly discards the result.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::TaskError;

/// Type-erased unit of work as stored in the queue. Runs at most once.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a single task execution.
pub type TaskResult<R> = Result<R, TaskError>;

struct Shared<R> {
    slot: Mutex<Option<TaskResult<R>>>,
    ready: Condvar,
}

/// Caller-side handle to a submitted task's result.
///
/// Single-consumer: `wait` consumes the handle. The handle resolves exactly
/// once, with the task's return value or with the [`TaskError`] carrying its
/// failure cause.
pub struct TaskHandle<R> {
    shared: Arc<Shared<R>>,
}

/// Worker-side handle used to resolve a task exactly once.
pub(crate) struct TaskCompletion<R> {
    shared: Arc<Shared<R>>,
}

impl<R> TaskHandle<R> {
    /// Create a connected handle/completion pair.
    pub(crate) fn new() -> (Self, TaskCompletion<R>) {
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        });
        (
            TaskHandle {
                shared: Arc::clone(&shared),
            },
            TaskCompletion { shared },
        )
    }

    /// Block until the task resolves, then return its outcome.
    pub fn wait(self) -> TaskResult<R> {
        let mut slot = self.shared.slot.lock();
        while slot.is_none() {
            self.shared.ready.wait(&mut slot);
        }
        slot.take().expect("one-shot slot checked non-empty")
    }

    /// Non-blocking probe: the outcome if the task already resolved.
    pub fn try_wait(self) -> Result<TaskResult<R>, Self> {
        {
            let mut slot = self.shared.slot.lock();
            if let Some(result) = slot.take() {
                return Ok(result);
            }
        }
        Err(self)
    }
}

impl<R> TaskCompletion<R> {
    /// Resolve the task. Wakes the waiting consumer, if any; with a dropped
    /// consumer the result is simply discarded.
    pub(crate) fn complete(self, result: TaskResult<R>) {
        let mut slot = self.shared.slot.lock();
        debug_assert!(slot.is_none(), "one-shot completed twice");
        *slot = Some(result);
        drop(slot);
        self.shared.ready.notify_one();
    }
}
