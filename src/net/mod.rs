//! Networked front-end: wire protocol, task server, client, and the metrics
//! HTTP endpoint.
//!
//! Everything here is mechanical plumbing over the core engine: the
//! protocol frames tasks, the server feeds them through an
//! [`InstrumentedPool`](crate::instrumented::InstrumentedPool), and the HTTP
//! endpoint exposes the registry for scraping.

pub mod client;
pub mod http;
pub mod protocol;
pub mod server;

pub use client::TaskClient;
pub use http::MetricsServer;
pub use protocol::{Message, MessageType, MAX_PAYLOAD};
pub use server::{Handler, TaskServer};
