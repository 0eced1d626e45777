//! Demo task client.
//!
//! Connects to a running task server, checks liveness, demonstrates result
//! and error propagation, then runs a small throughput benchmark and prints
//! per-submission latency percentiles.

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::error;

use taskforge::net::TaskClient;

#[derive(Parser)]
#[command(about = "Client for the task execution server")]
struct Args {
    /// Server host.
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(default_value_t = 8080)]
    port: u16,
}

const BENCH_TASKS: usize = 100;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    println!("Task client: connecting to {}:{}", args.host, args.port);

    let mut client = match TaskClient::connect(&args.host, args.port) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "connection failed; is the server running?");
            return ExitCode::FAILURE;
        }
    };
    println!("connected");

    // Liveness.
    if !client.ping() {
        error!("server did not answer ping");
        return ExitCode::FAILURE;
    }
    println!("ping: server alive");

    // Basic submit.
    match client.submit(b"hello from client".to_vec()) {
        Ok(handle) => match handle.wait() {
            Ok(result) => println!("result: {}", String::from_utf8_lossy(&result)),
            Err(e) => println!("unexpected task failure: {e}"),
        },
        Err(e) => {
            error!(error = %e, "submit failed");
            return ExitCode::FAILURE;
        }
    }

    // Error propagation: the demo server panics on payloads containing "fail".
    match client.submit(b"please fail this task".to_vec()) {
        Ok(handle) => match handle.wait() {
            Ok(_) => println!("error demo: unexpected success"),
            Err(e) => println!("error demo: server failure caught correctly: {e}"),
        },
        Err(e) => {
            error!(error = %e, "submit failed");
            return ExitCode::FAILURE;
        }
    }

    // Throughput benchmark with per-submission latency percentiles.
    println!("benchmark: {BENCH_TASKS} tasks");
    let mut latencies_us = Vec::with_capacity(BENCH_TASKS);
    let mut succeeded = 0_usize;
    let mut failed = 0_usize;
    let bench_start = Instant::now();

    for i in 0..BENCH_TASKS {
        let payload = format!("task-{i} data:{}", "x".repeat(i % 20));
        let start = Instant::now();
        match client.submit(payload.into_bytes()) {
            Ok(handle) => match handle.wait() {
                Ok(_) => succeeded += 1,
                Err(_) => failed += 1,
            },
            Err(e) => {
                error!(error = %e, "connection lost mid-benchmark");
                return ExitCode::FAILURE;
            }
        }
        latencies_us.push(start.elapsed().as_micros() as u64);
    }

    let total_ms = bench_start.elapsed().as_secs_f64() * 1000.0;
    latencies_us.sort_unstable();
    let avg = latencies_us.iter().sum::<u64>() as f64 / BENCH_TASKS as f64;

    println!("  tasks:       {BENCH_TASKS} ({succeeded} ok, {failed} failed)");
    println!("  total time:  {total_ms:.2} ms");
    println!(
        "  throughput:  {:.2} req/s",
        BENCH_TASKS as f64 / (total_ms / 1000.0)
    );
    println!("  latency avg: {avg:.2} µs");
    println!("  latency p50: {} µs", percentile(&latencies_us, 50));
    println!("  latency p95: {} µs", percentile(&latencies_us, 95));
    println!("  latency p99: {} µs", percentile(&latencies_us, 99));

    println!("done; check http://{}:9090/metrics for server-side stats", args.host);
    let _ = client.shutdown();
    ExitCode::SUCCESS
}

/// Nearest-rank percentile over an already sorted slice.
fn percentile(sorted_us: &[u64], pct: usize) -> u64 {
    let index = (sorted_us.len() * pct / 100).min(sorted_us.len() - 1);
    sorted_us[index]
}
