//! Concurrency-safe metric primitives with Prometheus text exposition.
//!
//! Three primitives cover the four golden signals: [`Counter`] (traffic,
//! errors), [`Gauge`] (saturation), [`Histogram`] (latency). All observation
//! paths are lock-free atomics; the single exception is the histogram's
//! floating-point sum, which sits behind its own short mutex because an f64
//! cannot be fetch-added portably.
//!
//! All mutation uses relaxed ordering: a counter increment does not need to
//! synchronize anything by itself, and callers that require ordering (the
//! instrumented pool's drain) impose it at their own level.
//!
//! [`Registry`] owns the metrics and renders the text format a scraper
//! expects; see [`registry`].

mod registry;

pub use registry::Registry;

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Monotonic counter.
#[derive(Debug)]
pub struct Counter {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Counter {
    /// Create a counter starting at zero.
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicU64::new(0),
        }
    }

    /// Increment by one.
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `delta`.
    #[inline]
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Render the HELP/TYPE/value block.
    pub fn render(&self) -> String {
        format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n",
            name = self.name,
            help = self.help,
            value = self.get()
        )
    }
}

/// Bidirectional gauge.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    help: String,
    value: AtomicI64,
}

impl Gauge {
    /// Create a gauge starting at zero.
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicI64::new(0),
        }
    }

    /// Set to an absolute value.
    #[inline]
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Increment by one.
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by one.
    #[inline]
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Render the HELP/TYPE/value block.
    pub fn render(&self) -> String {
        format!(
            "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n",
            name = self.name,
            help = self.help,
            value = self.get()
        )
    }
}

/// Bucketed latency histogram with cumulative buckets.
///
/// Buckets are upper bounds in seconds; each observation increments every
/// bucket whose bound is >= the value, so counts are already cumulative the
/// way a scraper expects (`le` semantics). The `+Inf` bucket always equals
/// the total observation count.
#[derive(Debug)]
pub struct Histogram {
    name: String,
    help: String,
    bounds: Vec<f64>,
    /// One slot per finite bound plus the trailing `+Inf` slot.
    bucket_counts: Box<[AtomicU64]>,
    sum: Mutex<f64>,
    count: AtomicU64,
}

impl Histogram {
    /// Default upper bounds: 100µs up to 5s.
    pub fn default_buckets() -> Vec<f64> {
        vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    }

    /// Create a histogram with the default buckets.
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::with_buckets(name, help, Self::default_buckets())
    }

    /// Create a histogram with custom upper bounds (sorted internally).
    pub fn with_buckets(
        name: impl Into<String>,
        help: impl Into<String>,
        mut bounds: Vec<f64>,
    ) -> Self {
        bounds.sort_by(|a, b| a.partial_cmp(b).expect("histogram bounds must not be NaN"));
        let bucket_counts = (0..bounds.len() + 1)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            name: name.into(),
            help: help.into(),
            bounds,
            bucket_counts,
            sum: Mutex::new(0.0),
            count: AtomicU64::new(0),
        }
    }

    /// Record one observation, in seconds.
    pub fn observe(&self, seconds: f64) {
        for (i, bound) in self.bounds.iter().enumerate() {
            if seconds <= *bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.bucket_counts[self.bounds.len()].fetch_add(1, Ordering::Relaxed);
        *self.sum.lock() += seconds;
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the elapsed time since `start`.
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observed values, in seconds.
    pub fn sum(&self) -> f64 {
        *self.sum.lock()
    }

    /// The finite upper bounds, sorted ascending.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Cumulative count for each finite bucket, in bound order.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.bucket_counts[..self.bounds.len()]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Render bucket lines, `+Inf`, sum and count.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} histogram", self.name);
        for (i, bound) in self.bounds.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                self.name,
                bound,
                self.bucket_counts[i].load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(
            out,
            "{}_bucket{{le=\"+Inf\"}} {}",
            self.name,
            self.bucket_counts[self.bounds.len()].load(Ordering::Relaxed)
        );
        let _ = writeln!(out, "{}_sum {}", self.name, self.sum());
        let _ = writeln!(out, "{}_count {}", self.name, self.count());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counter_starts_at_zero_and_is_monotonic() {
        let counter = Counter::new("test_total", "help");
        assert_eq!(counter.get(), 0);
        counter.inc();
        assert_eq!(counter.get(), 1);
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn counter_concurrent_increments_all_land() {
        let counter = Arc::new(Counter::new("test_total", "help"));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    counter.inc();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 80_000);
    }

    #[test]
    fn counter_render_format() {
        let counter = Counter::new("requests_total", "Total requests");
        counter.inc_by(3);
        assert_eq!(
            counter.render(),
            "# HELP requests_total Total requests\n\
             # TYPE requests_total counter\n\
             requests_total 3\n"
        );
    }

    #[test]
    fn gauge_set_inc_dec() {
        let gauge = Gauge::new("depth", "help");
        assert_eq!(gauge.get(), 0);
        gauge.set(10);
        assert_eq!(gauge.get(), 10);
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 11);
        gauge.set(-3);
        assert_eq!(gauge.get(), -3);
    }

    #[test]
    fn gauge_render_format() {
        let gauge = Gauge::new("active", "Active things");
        gauge.set(4);
        assert_eq!(
            gauge.render(),
            "# HELP active Active things\n# TYPE active gauge\nactive 4\n"
        );
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let histogram = Histogram::new("latency_seconds", "help");
        histogram.observe(0.0005); // lands in every bucket from 0.001 up
        histogram.observe(0.3); // lands in 0.5, 1.0, 5.0
        histogram.observe(100.0); // +Inf only

        let counts = histogram.bucket_counts();
        let bounds = histogram.bounds();
        for window in counts.windows(2) {
            assert!(window[0] <= window[1], "bucket counts must be cumulative");
        }
        assert_eq!(counts[bounds.len() - 1], 2); // <= 5.0
        assert_eq!(histogram.count(), 3);
        assert!((histogram.sum() - 100.3005).abs() < 1e-9);
    }

    #[test]
    fn histogram_inf_bucket_equals_count() {
        let histogram = Histogram::new("latency_seconds", "help");
        for i in 0..50 {
            histogram.observe(i as f64 * 0.01);
        }
        let rendered = histogram.render();
        assert!(rendered.contains("latency_seconds_bucket{le=\"+Inf\"} 50"));
        assert!(rendered.contains("latency_seconds_count 50"));
    }

    #[test]
    fn histogram_observe_since_is_positive() {
        let histogram = Histogram::new("latency_seconds", "help");
        let start = Instant::now();
        thread::sleep(std::time::Duration::from_millis(5));
        histogram.observe_since(start);
        assert_eq!(histogram.count(), 1);
        assert!(histogram.sum() > 0.0);
    }

    #[test]
    fn histogram_custom_bounds_are_sorted() {
        let histogram =
            Histogram::with_buckets("latency_seconds", "help", vec![1.0, 0.1, 0.5]);
        assert_eq!(histogram.bounds(), &[0.1, 0.5, 1.0]);
    }

    #[test]
    fn histogram_render_shape() {
        let histogram = Histogram::with_buckets("h", "help", vec![0.5, 1.0]);
        histogram.observe(0.2);
        assert_eq!(
            histogram.render(),
            "# HELP h help\n\
             # TYPE h histogram\n\
             h_bucket{le=\"0.5\"} 1\n\
             h_bucket{le=\"1\"} 1\n\
             h_bucket{le=\"+Inf\"} 1\n\
             h_sum 0.2\n\
             h_count 1\n"
        );
    }
}
