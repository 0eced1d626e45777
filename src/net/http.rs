//! Minimal HTTP/1.1 endpoint serving the metrics registry.
//!
//! Serves three routes: `GET /metrics` returns the registry's current text
//! rendering, `GET /health` answers liveness probes, everything else is a
//! 404 with a hint. Scrapes are rare (every few seconds at most), so each
//! connection is handled inline on the serving thread and closed after one
//! response.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics::Registry;

struct HttpShared {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    running: AtomicBool,
}

/// Background HTTP server for `GET /metrics` and `GET /health`.
pub struct MetricsServer {
    shared: Arc<HttpShared>,
    thread: Option<JoinHandle<()>>,
}

impl MetricsServer {
    /// Bind the listening socket (port 0 → kernel-chosen ephemeral port).
    pub fn bind(port: u16, registry: Arc<Registry>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            shared: Arc::new(HttpShared {
                listener,
                local_addr,
                registry,
                running: AtomicBool::new(false),
            }),
            thread: None,
        })
    }

    /// Begin serving on a background thread.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("taskforge-metrics".into())
            .spawn(move || serve_loop(&shared))
            .expect("failed to spawn metrics thread");
        self.thread = Some(thread);

        info!(addr = %self.shared.local_addr, "metrics endpoint listening");
    }

    /// Stop serving and join the background thread. Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = TcpStream::connect(("127.0.0.1", self.shared.local_addr.port()));
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("metrics endpoint stopped");
    }

    /// The actual bound port (useful with port 0).
    pub fn local_port(&self) -> u16 {
        self.shared.local_addr.port()
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(shared: &HttpShared) {
    loop {
        let (stream, _) = match shared.listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                if !shared.running.load(Ordering::Acquire) {
                    return;
                }
                warn!(error = %e, "metrics accept failed");
                continue;
            }
        };
        if !shared.running.load(Ordering::Acquire) {
            return;
        }
        handle_connection(shared, stream);
    }
}

fn handle_connection(shared: &HttpShared, mut stream: TcpStream) {
    // One read is enough: we only route on the request line of a GET.
    let mut buf = [0_u8; 1024];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = String::from_utf8_lossy(&buf[..n]);

    let response = if request.starts_with("GET /metrics") {
        http_response(
            "200 OK",
            "text/plain; version=0.0.4",
            &shared.registry.render(),
        )
    } else if request.starts_with("GET /health") {
        http_response("200 OK", "text/plain", "OK\n")
    } else {
        http_response("404 Not Found", "text/plain", "Endpoints: /metrics, /health\n")
    };

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.shutdown(std::net::Shutdown::Both);
}

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        len = body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn started_server(registry: Arc<Registry>) -> MetricsServer {
        let mut server = MetricsServer::bind(0, registry).unwrap();
        server.start();
        server
    }

    #[test]
    fn health_endpoint_answers_ok() {
        let server = started_server(Arc::new(Registry::new()));
        let response = get(server.local_port(), "/health");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK\n"));
    }

    #[test]
    fn metrics_endpoint_serves_registry_body() {
        let registry = Arc::new(Registry::new());
        let counter = registry.add_counter("hits_total", "Hits");
        counter.inc_by(9);

        let server = started_server(registry);
        let response = get(server.local_port(), "/metrics");
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Content-Type: text/plain; version=0.0.4"));
        assert!(response.contains("Connection: close"));
        assert!(response.contains("hits_total 9"));
    }

    #[test]
    fn unknown_path_is_404_with_hint() {
        let server = started_server(Arc::new(Registry::new()));
        let response = get(server.local_port(), "/nope");
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        assert!(response.contains("Endpoints: /metrics, /health"));
    }

    #[test]
    fn stop_unblocks_and_joins() {
        let mut server = started_server(Arc::new(Registry::new()));
        server.stop();
        server.stop();
    }
}
