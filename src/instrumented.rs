//! Metric-instrumented wrapper around [`WorkerPool`].
//!
//! Every submission is re-wrapped so the four golden signals are updated at
//! fixed points around the user closure. The interesting contract is the
//! ordering between the wrapper's bookkeeping and the underlying pool's
//! drain signal:
//!
//! The pool counts a task as done the moment its `active` counter drops,
//! which happens only after the whole wrapper returns. The wrapper therefore
//! commits latency and the completed/failed counters *before* it touches the
//! transient gauges at its tail, and [`InstrumentedPool::wait_all`] still
//! runs a second phase, spinning until `submitted == completed + failed`,
//! to close the window between the pool-level decrement and the last
//! counter increment. A reader inspecting the counters right after
//! `wait_all` returns sees final values, never a task that is "done below,
//! uncounted above".

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::config::PoolConfig;
use crate::error::{Result, TaskError};
use crate::metrics::{Counter, Gauge, Histogram, Registry};
use crate::pool::WorkerPool;
use crate::task::TaskHandle;

/// A [`WorkerPool`] that reports submissions, outcomes, queue depth, active
/// workers, and end-to-end latency into a [`Registry`].
///
/// If no registry is shared at construction, the pool owns a private one so
/// every metric path stays valid.
pub struct InstrumentedPool {
    pool: WorkerPool,
    registry: Arc<Registry>,

    tasks_submitted: Arc<Counter>,
    tasks_completed: Arc<Counter>,
    tasks_failed: Arc<Counter>,
    queue_depth: Arc<Gauge>,
    active_workers: Arc<Gauge>,
    task_latency: Arc<Histogram>,
}

impl InstrumentedPool {
    /// Build a pool with a private registry.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(Registry::new()))
    }

    /// Build a pool reporting into a shared registry.
    pub fn with_registry(config: &PoolConfig, registry: Arc<Registry>) -> Result<Self> {
        let pool = WorkerPool::new(config)?;

        let tasks_submitted = registry.add_counter(
            "threadpool_tasks_submitted_total",
            "Total number of tasks submitted to the thread pool",
        );
        let tasks_completed = registry.add_counter(
            "threadpool_tasks_completed_total",
            "Total number of tasks that completed successfully",
        );
        let tasks_failed = registry.add_counter(
            "threadpool_tasks_failed_total",
            "Total number of tasks that panicked",
        );
        let queue_depth = registry.add_gauge(
            "threadpool_queue_depth_current",
            "Current number of tasks waiting in the queue",
        );
        let active_workers = registry.add_gauge(
            "threadpool_active_workers_current",
            "Current number of threads actively executing tasks",
        );
        // The thread count never changes after construction, so the gauge is
        // set once here and lives on only in the registry.
        registry
            .add_gauge(
                "threadpool_thread_count",
                "Total number of worker threads in the pool",
            )
            .set(pool.thread_count() as i64);
        let task_latency = registry.add_histogram(
            "threadpool_task_latency_seconds",
            "End-to-end task latency from submission to completion",
        );

        Ok(Self {
            pool,
            registry,
            tasks_submitted,
            tasks_completed,
            tasks_failed,
            queue_depth,
            active_workers,
            task_latency,
        })
    }

    /// Submit a closure with full instrumentation.
    ///
    /// Same submission semantics as [`WorkerPool::submit`]: backpressure
    /// retries then `QueueFull`, `SubmitAfterStop` during shutdown, and the
    /// task runs even if the handle is dropped.
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let submit_time = Instant::now();

        let (handle, completion) = TaskHandle::new();
        let shared = self.pool.shared();
        let tasks_completed = Arc::clone(&self.tasks_completed);
        let tasks_failed = Arc::clone(&self.tasks_failed);
        let queue_depth = Arc::clone(&self.queue_depth);
        let active_workers = Arc::clone(&self.active_workers);
        let task_latency = Arc::clone(&self.task_latency);

        self.pool.execute(Box::new(move || {
            active_workers.inc();
            queue_depth.set(shared.queue_depth() as i64);

            let ok = match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    completion.complete(Ok(value));
                    true
                }
                Err(payload) => {
                    tasks_failed.inc();
                    completion.complete(Err(TaskError::from_panic(payload.as_ref())));
                    false
                }
            };

            // Latency and the outcome counter must land before the
            // active-workers decrement below: wait_all's second phase keys
            // off submitted == completed + failed.
            task_latency.observe_since(submit_time);
            if ok {
                tasks_completed.inc();
            }

            active_workers.dec();
            queue_depth.set(shared.queue_depth() as i64);
        }))?;

        // Counted only after the queue accepted the task: a rejected submit
        // must not leave `submitted` ahead of what can ever complete, or the
        // drain identity below would never close.
        self.tasks_submitted.inc();
        self.queue_depth.set(self.pool.queue_depth() as i64);
        Ok(handle)
    }

    /// Block until every submitted task has fully finished, metric updates
    /// included.
    ///
    /// Phase 1 drains the underlying pool (queue empty, no active worker).
    /// Phase 2 spins until the counter identity `submitted == completed +
    /// failed` holds, catching wrappers whose pool-level accounting finished
    /// a beat before their last counter increment. The transient gauges are
    /// then reset to zero.
    pub fn wait_all(&self) {
        self.pool.wait_all();

        let submitted = self.tasks_submitted.get();
        while self.tasks_completed.get() + self.tasks_failed.get() < submitted {
            thread::yield_now();
        }

        self.queue_depth.set(0);
        self.active_workers.set(0);
    }

    /// Total tasks submitted.
    pub fn tasks_submitted(&self) -> u64 {
        self.tasks_submitted.get()
    }

    /// Total tasks that completed successfully.
    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed.get()
    }

    /// Total tasks that panicked.
    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.get()
    }

    /// Current queued-task count from the underlying pool.
    pub fn queue_depth(&self) -> usize {
        self.pool.queue_depth()
    }

    /// Current executing-task count from the underlying pool.
    pub fn active_workers(&self) -> usize {
        self.pool.active_count()
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// The registry this pool reports into.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Latency histogram handle, for snapshotting percentile state.
    pub fn task_latency(&self) -> &Arc<Histogram> {
        &self.task_latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(workers: usize) -> InstrumentedPool {
        InstrumentedPool::new(&PoolConfig::new().workers(workers).queue_capacity(256)).unwrap()
    }

    #[test]
    fn counts_are_exact_after_wait_all() {
        let pool = pool(4);
        for _ in 0..200 {
            pool.submit(|| {}).unwrap();
        }
        pool.wait_all();

        assert_eq!(pool.tasks_submitted(), 200);
        assert_eq!(pool.tasks_completed(), 200);
        assert_eq!(pool.tasks_failed(), 0);
        assert_eq!(pool.queue_depth(), 0);
        assert_eq!(pool.active_workers(), 0);
    }

    #[test]
    fn failures_and_successes_are_counted_separately() {
        let pool = pool(2);
        let mut handles = Vec::new();

        for i in 0..20 {
            if i % 2 == 0 {
                handles.push(Ok(pool.submit(|| 42_u32).unwrap()));
            } else {
                handles.push(Err(pool.submit(|| -> u32 { panic!("odd task") }).unwrap()));
            }
        }
        pool.wait_all();

        assert_eq!(pool.tasks_submitted(), 20);
        assert_eq!(pool.tasks_completed(), 10);
        assert_eq!(pool.tasks_failed(), 10);

        for handle in handles {
            match handle {
                Ok(h) => assert_eq!(h.wait(), Ok(42)),
                Err(h) => assert!(h.wait().unwrap_err().message().contains("odd task")),
            }
        }
    }

    #[test]
    fn drain_identity_holds_under_load() {
        let pool = pool(4);
        let slow = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let slow = Arc::clone(&slow);
            pool.submit(move || {
                // Enough work that wait_all overlaps real execution.
                for _ in 0..1000 {
                    slow.fetch_add(1, Ordering::Relaxed);
                }
            })
            .unwrap();
        }
        pool.wait_all();

        assert_eq!(
            pool.tasks_completed() + pool.tasks_failed(),
            pool.tasks_submitted()
        );
        assert_eq!(slow.load(Ordering::Relaxed), 100_000);
    }

    #[test]
    fn latency_histogram_records_every_task() {
        let pool = pool(2);
        for _ in 0..50 {
            pool.submit(|| {}).unwrap();
        }
        pool.wait_all();

        assert_eq!(pool.task_latency().count(), 50);
        assert!(pool.task_latency().sum() >= 0.0);
    }

    #[test]
    fn private_registry_renders_pool_metrics() {
        let pool = pool(3);
        pool.submit(|| {}).unwrap();
        pool.wait_all();

        let page = pool.registry().render();
        assert!(page.contains("threadpool_tasks_submitted_total 1"));
        assert!(page.contains("threadpool_tasks_completed_total 1"));
        assert!(page.contains("threadpool_thread_count 3"));
        assert!(page.contains("threadpool_task_latency_seconds_bucket{le=\"+Inf\"} 1"));
    }

    #[test]
    fn shared_registry_is_used_when_given() {
        let registry = Arc::new(Registry::new());
        let pool =
            InstrumentedPool::with_registry(&PoolConfig::new().workers(1), Arc::clone(&registry))
                .unwrap();
        pool.submit(|| {}).unwrap();
        pool.wait_all();

        assert!(registry
            .render()
            .contains("threadpool_tasks_submitted_total 1"));
    }
}
