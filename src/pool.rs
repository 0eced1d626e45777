//! Worker pool over the lock-free queue.
//!
//! N OS threads loop on `try_dequeue` with a spin-then-yield idle strategy:
//! dequeue attempts stay in userspace while work is flowing, and the thread
//! gives up its timeslice once the queue has been empty for a while. There is
//! no condition variable anywhere on the hot path.
//!
//! # Drain correctness
//!
//! `wait_all` polls `queue.is_empty() && active == 0`. The worker increments
//! `active` immediately after a successful dequeue and before running the
//! task; incrementing after the task started (or decrementing before
//! bookkeeping layered on top has finished) opens a window where an observer
//! sees an empty queue and zero active workers while work is still in flight.
//! This pool only guarantees the queue/active invariant; layered bookkeeping
//! is the instrumented wrapper's problem, and it solves it with a second
//! drain phase.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::config::PoolConfig;
use crate::error::{Error, Result, TaskError};
use crate::queue::MpmcQueue;
use crate::task::{Task, TaskHandle};

/// Dequeue attempts spun through before yielding the timeslice.
const SPIN_COUNT: usize = 64;

/// Yields tolerated while the queue is full before submit gives up.
const MAX_SUBMIT_RETRIES: usize = 1000;

/// State shared between the pool handle and its workers.
pub(crate) struct PoolShared {
    queue: MpmcQueue<Task>,
    stop: AtomicBool,
    active: AtomicUsize,
    total_enqueued: AtomicUsize,
    total_completed: AtomicUsize,
}

impl PoolShared {
    pub(crate) fn queue_depth(&self) -> usize {
        self.queue.len()
    }
}

/// A fixed-size pool of worker threads fed by the bounded MPMC queue.
///
/// `submit` returns a [`TaskHandle`] that resolves with the closure's return
/// value, or with a [`TaskError`] if the closure panicked. Dropping the pool
/// requests stop, lets the workers drain everything already queued, and joins
/// them.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn a pool from `config`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if the config fails validation
    /// (zero workers, bad capacity).
    pub fn new(config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            queue: MpmcQueue::new(config.queue_capacity)?,
            stop: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            total_enqueued: AtomicUsize::new(0),
            total_completed: AtomicUsize::new(0),
        });

        let workers = (0..config.workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("taskforge-worker-{i:04}"))
                    .spawn(move || worker_loop(&shared))
                    .map_err(Error::Io)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(workers = workers.len(), capacity = config.queue_capacity, "pool started");
        Ok(Self { shared, workers })
    }

    /// Submit a closure, returning a handle to its eventual result.
    ///
    /// The closure and its captures are moved into the pool. A full queue is
    /// retried with a yield up to 1000 times, then surfaces
    /// [`Error::QueueFull`]; callers wanting indefinite retry implement it
    /// outside. The task runs even if the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// [`Error::SubmitAfterStop`] once shutdown has been requested,
    /// [`Error::QueueFull`] when the retry limit is exhausted.
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (handle, completion) = TaskHandle::new();

        let task: Task = Box::new(move || {
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => completion.complete(Ok(value)),
                Err(payload) => completion.complete(Err(TaskError::from_panic(payload.as_ref()))),
            }
        });

        self.execute(task)?;
        Ok(handle)
    }

    /// Enqueue an already type-erased task, applying the stop check and the
    /// bounded backpressure retry. Shared by `submit` and the instrumented
    /// wrapper, which builds its own completion plumbing.
    pub(crate) fn execute(&self, task: Task) -> Result<()> {
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(Error::SubmitAfterStop);
        }

        let mut task = task;
        let mut retries = 0;
        loop {
            match self.shared.queue.try_enqueue(task) {
                Ok(()) => break,
                Err(returned) => {
                    if self.shared.stop.load(Ordering::Acquire) {
                        return Err(Error::SubmitAfterStop);
                    }
                    retries += 1;
                    if retries > MAX_SUBMIT_RETRIES {
                        return Err(Error::QueueFull(MAX_SUBMIT_RETRIES));
                    }
                    task = returned;
                    thread::yield_now();
                }
            }
        }

        self.shared.total_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Block until the queue is empty and no worker is executing a task.
    pub fn wait_all(&self) {
        while !self.shared.queue.is_empty() || self.shared.active.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }
    }

    /// Tasks currently waiting in the queue (approximate).
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    /// Tasks currently executing on a worker.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Total tasks accepted by `submit`/`execute`.
    pub fn total_enqueued(&self) -> usize {
        self.shared.total_enqueued.load(Ordering::Relaxed)
    }

    /// Total tasks a worker has finished running.
    pub fn total_completed(&self) -> usize {
        self.shared.total_completed.load(Ordering::Relaxed)
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Cheap handle onto shared pool state, for layered instrumentation.
    pub(crate) fn shared(&self) -> Arc<PoolShared> {
        Arc::clone(&self.shared)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        // Workers drain whatever is still queued before observing the stop.
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("pool stopped");
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        if let Some(task) = shared.queue.try_dequeue() {
            // Increment before running: wait_all must never observe
            // empty-queue/zero-active while this task is in flight.
            shared.active.fetch_add(1, Ordering::AcqRel);
            task();
            shared.active.fetch_sub(1, Ordering::AcqRel);
            shared.total_completed.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if shared.stop.load(Ordering::Acquire) && shared.queue.is_empty() {
            return;
        }

        // Spin with a pause hint while the queue looks likely to refill,
        // then hand the timeslice back to the scheduler.
        for _ in 0..SPIN_COUNT {
            std::hint::spin_loop();
            if !shared.queue.is_empty() {
                break;
            }
        }
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn small_pool(workers: usize) -> WorkerPool {
        WorkerPool::new(&PoolConfig::new().workers(workers).queue_capacity(64)).unwrap()
    }

    #[test]
    fn zero_workers_is_an_error() {
        let result = WorkerPool::new(&PoolConfig::new().workers(0));
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn submit_resolves_with_return_value() {
        let pool = small_pool(2);
        let handle = pool.submit(|| 21 * 2).unwrap();
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn all_tasks_execute() {
        let pool = small_pool(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.wait_all();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        assert_eq!(pool.total_enqueued(), 100);
        assert_eq!(pool.total_completed(), 100);
        assert_eq!(pool.queue_depth(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn panicking_task_resolves_with_failure_and_worker_survives() {
        let pool = small_pool(1);

        let failed = pool.submit(|| panic!("deliberate")).unwrap();
        let err = failed.wait().unwrap_err();
        assert!(err.message().contains("deliberate"));

        // The single worker must still be alive to run this.
        let ok = pool.submit(|| "still here").unwrap();
        assert_eq!(ok.wait(), Ok("still here"));
    }

    #[test]
    fn dropped_handle_still_runs_task() {
        let pool = small_pool(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_clone = Arc::clone(&ran);
        let handle = pool.submit(move || {
            ran_clone.fetch_add(1, Ordering::Relaxed);
        });
        drop(handle);

        pool.wait_all();
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn wait_all_sees_slow_tasks_through() {
        let pool = small_pool(4);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }

        pool.wait_all();
        assert_eq!(done.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn drop_drains_queued_tasks() {
        let done = Arc::new(AtomicUsize::new(0));
        {
            let pool = small_pool(1);
            for _ in 0..20 {
                let done = Arc::clone(&done);
                pool.submit(move || {
                    done.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
            }
            // Pool dropped here with tasks likely still queued.
        }
        assert_eq!(done.load(Ordering::Relaxed), 20);
    }

    #[test]
    fn thread_count_matches_config() {
        let pool = small_pool(3);
        assert_eq!(pool.thread_count(), 3);
    }

    #[test]
    fn queue_full_after_bounded_retry() {
        let pool = WorkerPool::new(&PoolConfig::new().workers(1).queue_capacity(2)).unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        // Park the only worker on a task that waits for the release signal.
        let blocker = pool
            .submit(move || {
                let _ = release_rx.recv();
            })
            .unwrap();
        while pool.active_count() == 0 {
            thread::yield_now();
        }

        // Both queue slots fill while the worker is parked.
        pool.submit(|| {}).unwrap();
        pool.submit(|| {}).unwrap();

        match pool.submit(|| {}) {
            Err(Error::QueueFull(_)) => {}
            Err(e) => panic!("expected QueueFull, got {e}"),
            Ok(_) => panic!("expected QueueFull, got success"),
        }

        release_tx.send(()).unwrap();
        pool.wait_all();
        assert_eq!(blocker.wait(), Ok(()));
    }
}
