//! TCP task execution server.
//!
//! Accepts framed requests, runs the user handler through an
//! [`InstrumentedPool`], and replies with the result (or the failure) under
//! the same correlation id. Each connection gets its own OS thread so a
//! blocked connection can never starve the pool of the workers its requests
//! need.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::instrumented::InstrumentedPool;
use crate::metrics::{Counter, Gauge, Histogram, Registry};
use crate::net::protocol::{read_message, write_message, Message, MessageType};

/// User task handler: raw request payload in, response payload out.
///
/// A panicking handler fails only its own request; the failure message is
/// forwarded to the client as an ERROR frame.
pub type Handler = Arc<dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync>;

struct ServerShared {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Handler,
    pool: InstrumentedPool,
    running: AtomicBool,

    conn_accepted: Arc<Counter>,
    conn_active: Arc<Gauge>,
    requests_total: Arc<Counter>,
    request_errors: Arc<Counter>,
    request_latency: Arc<Histogram>,
}

/// Networked front-end for the instrumented pool.
///
/// `bind` with port 0 asks the kernel for an ephemeral port;
/// [`local_port`](Self::local_port) is readable as soon as `bind` returns.
pub struct TaskServer {
    shared: Arc<ServerShared>,
    accept_thread: Option<JoinHandle<()>>,
}

impl TaskServer {
    /// Bind the listening socket and build the backing pool.
    ///
    /// The server does not accept connections until [`start`](Self::start).
    pub fn bind(
        port: u16,
        handler: Handler,
        registry: Arc<Registry>,
        config: &PoolConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let local_addr = listener.local_addr()?;
        let pool = InstrumentedPool::with_registry(config, Arc::clone(&registry))?;

        let conn_accepted = registry.add_counter(
            "server_connections_accepted_total",
            "Total TCP connections accepted",
        );
        let conn_active = registry.add_gauge(
            "server_connections_active_current",
            "Currently open TCP connections",
        );
        let requests_total =
            registry.add_counter("server_requests_total", "Total task requests received");
        let request_errors = registry.add_counter(
            "server_request_errors_total",
            "Total requests that resulted in errors",
        );
        let request_latency = registry.add_histogram(
            "server_request_latency_seconds",
            "End-to-end request latency from TCP receive to TCP send",
        );

        Ok(Self {
            shared: Arc::new(ServerShared {
                listener,
                local_addr,
                handler,
                pool,
                running: AtomicBool::new(false),
                conn_accepted,
                conn_active,
                requests_total,
                request_errors,
                request_latency,
            }),
            accept_thread: None,
        })
    }

    /// Begin accepting connections on a background thread.
    pub fn start(&mut self) {
        if self.accept_thread.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("taskforge-accept".into())
            .spawn(move || accept_loop(&shared))
            .expect("failed to spawn accept thread");
        self.accept_thread = Some(thread);

        info!(addr = %self.shared.local_addr, "task server listening");
    }

    /// Stop accepting connections and join the accept thread. Idempotent.
    ///
    /// Open connections finish their in-flight request and then observe the
    /// stopped flag on their next read.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        // A blocked accept() only returns on a connection; dial ourselves
        // once so the loop can observe the stop flag.
        let _ = TcpStream::connect(("127.0.0.1", self.shared.local_addr.port()));
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
        debug!("task server stopped");
    }

    /// The actual bound port (useful with port 0).
    pub fn local_port(&self) -> u16 {
        self.shared.local_addr.port()
    }

    /// The instrumented pool executing this server's requests.
    pub fn pool(&self) -> &InstrumentedPool {
        &self.shared.pool
    }
}

impl Drop for TaskServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(shared: &Arc<ServerShared>) {
    loop {
        let (stream, peer) = match shared.listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if !shared.running.load(Ordering::Acquire) {
            return;
        }

        shared.conn_accepted.inc();
        shared.conn_active.inc();
        debug!(%peer, "connection accepted");

        let shared = Arc::clone(shared);
        let _ = thread::Builder::new()
            .name("taskforge-conn".into())
            .spawn(move || {
                handle_connection(&shared, stream);
                shared.conn_active.dec();
            });
    }
}

fn handle_connection(shared: &ServerShared, mut stream: TcpStream) {
    while shared.running.load(Ordering::Acquire) {
        let request = match read_message(&mut stream) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "connection closed");
                return;
            }
        };

        match request.kind {
            MessageType::Ping => {
                let pong = Message::new(MessageType::Pong, request.id, Vec::new());
                if write_message(&mut stream, &pong).is_err() {
                    return;
                }
            }
            MessageType::Request => {
                if !serve_request(shared, &mut stream, request) {
                    return;
                }
            }
            other => {
                debug!(kind = ?other, "unexpected message kind, closing");
                return;
            }
        }
    }
}

/// Run one REQUEST through the pool and reply. Returns false when the
/// connection should be dropped.
fn serve_request(shared: &ServerShared, stream: &mut TcpStream, request: Message) -> bool {
    let start = Instant::now();
    shared.requests_total.inc();

    let handler = Arc::clone(&shared.handler);
    let payload = request.payload;
    let submitted = shared.pool.submit(move || handler(payload));

    let (kind, body) = match submitted.map(|handle| handle.wait()) {
        Ok(Ok(result)) => (MessageType::Response, result),
        Ok(Err(task_err)) => {
            shared.request_errors.inc();
            (
                MessageType::Error,
                format!("ERROR: {}", task_err.message()).into_bytes(),
            )
        }
        Err(submit_err) => {
            shared.request_errors.inc();
            (
                MessageType::Error,
                format!("ERROR: {submit_err}").into_bytes(),
            )
        }
    };

    let reply = Message::new(kind, request.id, body);
    if write_message(stream, &reply).is_err() {
        return false;
    }

    shared.request_latency.observe_since(start);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::client::TaskClient;

    fn echo_server() -> TaskServer {
        let registry = Arc::new(Registry::new());
        let handler: Handler = Arc::new(|payload| payload);
        let mut server = TaskServer::bind(
            0,
            handler,
            registry,
            &PoolConfig::new().workers(2).queue_capacity(64),
        )
        .unwrap();
        server.start();
        server
    }

    #[test]
    fn port_zero_yields_real_port() {
        let server = echo_server();
        assert_ne!(server.local_port(), 0);
    }

    #[test]
    fn echo_round_trip() {
        let server = echo_server();
        let mut client = TaskClient::connect("127.0.0.1", server.local_port()).unwrap();

        let handle = client.submit(b"hello".to_vec()).unwrap();
        assert_eq!(handle.wait(), Ok(b"hello".to_vec()));
    }

    #[test]
    fn ping_pong() {
        let server = echo_server();
        let mut client = TaskClient::connect("127.0.0.1", server.local_port()).unwrap();
        assert!(client.ping());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut server = echo_server();
        server.stop();
        server.stop();
    }

    #[test]
    fn server_metrics_track_requests() {
        let server = echo_server();
        let mut client = TaskClient::connect("127.0.0.1", server.local_port()).unwrap();

        for i in 0..5_u32 {
            let handle = client.submit(i.to_be_bytes().to_vec()).unwrap();
            handle.wait().unwrap();
        }

        let page = server.pool().registry().render();
        assert!(page.contains("server_requests_total 5"));
        assert!(page.contains("server_connections_accepted_total 1"));
    }
}
