//! # taskforge
//!
//! **A lock-free task execution engine with a networked front-end**
//!
//! Callers submit opaque closures and get back handles that resolve with the
//! result or the failure. Deploy it embedded as a library, or stand it up as
//! a TCP server that executes payloads from remote clients; either way a
//! companion HTTP endpoint exposes counters and latency distributions in
//! Prometheus text format.
//!
//! ## Features
//!
//! - **Lock-free core**: bounded MPMC ring buffer using the sequence-counter
//!   slot protocol; no mutex, no condition variable on the hot path
//! - **Worker pool**: spin-then-yield idle strategy, graceful drain, panics
//!   contained per task
//! - **Built-in observability**: every submission tracked across counters,
//!   gauges, and a latency histogram, scrapable at `GET /metrics`
//! - **Wire protocol**: length-prefixed binary framing with correlation ids,
//!   PING/PONG liveness, 64 MiB payload cap
//!
//! ## Quick Start
//!
//! ```
//! use taskforge::{InstrumentedPool, PoolConfig};
//!
//! let pool = InstrumentedPool::new(&PoolConfig::new().workers(4))?;
//!
//! let handle = pool.submit(|| 6 * 7)?;
//! assert_eq!(handle.wait(), Ok(42));
//!
//! pool.wait_all();
//! assert_eq!(pool.tasks_completed(), 1);
//! # Ok::<(), taskforge::Error>(())
//! ```
//!
//! ## Serving tasks over TCP
//!
//! ```no_run
//! use std::sync::Arc;
//! use taskforge::net::{Handler, MetricsServer, TaskServer};
//! use taskforge::{PoolConfig, Registry};
//!
//! let registry = Arc::new(Registry::new());
//! let handler: Handler = Arc::new(|payload| payload); // echo
//!
//! let mut server = TaskServer::bind(8080, handler, Arc::clone(&registry), &PoolConfig::new())?;
//! server.start();
//!
//! let mut metrics = MetricsServer::bind(9090, registry)?;
//! metrics.start();
//! # Ok::<(), taskforge::Error>(())
//! ```
//!
//! ## Drain semantics
//!
//! [`InstrumentedPool::wait_all`] returns only once the queue is empty, no
//! worker is mid-task, *and* the metric identity `submitted == completed +
//! failed` holds, so counters read immediately afterwards are final, not
//! merely close.

pub mod config;
pub mod error;
pub mod instrumented;
pub mod metrics;
pub mod net;
pub mod pool;
pub mod queue;
pub mod task;

pub use config::PoolConfig;
pub use error::{Error, Result, TaskError};
pub use instrumented::InstrumentedPool;
pub use metrics::{Counter, Gauge, Histogram, Registry};
pub use pool::WorkerPool;
pub use queue::MpmcQueue;
pub use task::{TaskHandle, TaskResult};
