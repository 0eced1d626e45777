//! Demo task server.
//!
//! Starts a task server and a metrics endpoint, with a handler that echoes
//! its input back with processing metadata. Payloads containing `fail` make
//! the handler panic so error propagation can be demonstrated end to end.
//!
//! Run this, then in another terminal:
//!
//! ```text
//! cargo run --bin client                      # exercise the server
//! curl http://localhost:9090/metrics          # live metrics
//! curl http://localhost:9090/health           # liveness probe
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use taskforge::net::{Handler, MetricsServer, TaskServer};
use taskforge::{PoolConfig, Registry};

#[derive(Parser)]
#[command(about = "Task execution server with a Prometheus metrics endpoint")]
struct Args {
    /// Port for the task server.
    #[arg(default_value_t = 8080)]
    task_port: u16,

    /// Port for the metrics endpoint.
    #[arg(default_value_t = 9090)]
    metrics_port: u16,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let registry = Arc::new(Registry::new());

    // Echo-style handler with simulated, input-proportional work. Inputs
    // containing "fail" panic so clients can observe ERROR replies.
    let handler: Handler = Arc::new(|payload| {
        let input = String::from_utf8_lossy(&payload).into_owned();
        let duration_ms = (input.len() as u64 * 2).min(50);
        thread::sleep(Duration::from_millis(duration_ms));

        if input.contains("fail") {
            panic!("task explicitly requested failure");
        }

        format!(
            "processed: [{input}] len={} duration={duration_ms}ms",
            input.len()
        )
        .into_bytes()
    });

    let mut task_server = match TaskServer::bind(
        args.task_port,
        handler,
        Arc::clone(&registry),
        &PoolConfig::new().workers(4),
    ) {
        Ok(server) => server,
        Err(e) => {
            error!(port = args.task_port, error = %e, "failed to bind task server");
            return ExitCode::FAILURE;
        }
    };
    task_server.start();

    let mut metrics_server = match MetricsServer::bind(args.metrics_port, Arc::clone(&registry)) {
        Ok(server) => server,
        Err(e) => {
            error!(port = args.metrics_port, error = %e, "failed to bind metrics endpoint");
            return ExitCode::FAILURE;
        }
    };
    metrics_server.start();

    info!(
        task_port = task_server.local_port(),
        metrics_port = metrics_server.local_port(),
        "serving; waiting for clients"
    );

    loop {
        thread::sleep(Duration::from_secs(5));

        let page = registry.render();
        info!(
            requests = extract(&page, "server_requests_total"),
            errors = extract(&page, "server_request_errors_total"),
            active_conns = extract(&page, "server_connections_active_current"),
            pool_completed = extract(&page, "threadpool_tasks_completed_total"),
            "snapshot"
        );
    }
}

/// Pull a single metric value out of a rendered page, for log snapshots.
fn extract<'a>(page: &'a str, name: &str) -> &'a str {
    page.lines()
        .find_map(|line| line.strip_prefix(name).and_then(|rest| rest.strip_prefix(' ')))
        .unwrap_or("?")
}
