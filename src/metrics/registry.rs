//! Registry of owned metrics and the full-page text exposition.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Counter, Gauge, Histogram};

/// Owns every registered metric and renders the `/metrics` page.
///
/// Registration appends under a single mutex and hands back an `Arc` handle;
/// metric mutation itself never touches the registry lock. The lock is held
/// only across a push and across a full render pass.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    counters: Vec<Arc<Counter>>,
    gauges: Vec<Arc<Gauge>>,
    histograms: Vec<Arc<Histogram>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new counter and return a handle to it.
    pub fn add_counter(&self, name: impl Into<String>, help: impl Into<String>) -> Arc<Counter> {
        let counter = Arc::new(Counter::new(name, help));
        self.inner.lock().counters.push(Arc::clone(&counter));
        counter
    }

    /// Register a new gauge and return a handle to it.
    pub fn add_gauge(&self, name: impl Into<String>, help: impl Into<String>) -> Arc<Gauge> {
        let gauge = Arc::new(Gauge::new(name, help));
        self.inner.lock().gauges.push(Arc::clone(&gauge));
        gauge
    }

    /// Register a new histogram with the default buckets.
    pub fn add_histogram(&self, name: impl Into<String>, help: impl Into<String>) -> Arc<Histogram> {
        self.add_histogram_with_buckets(name, help, Histogram::default_buckets())
    }

    /// Register a new histogram with custom upper bounds.
    pub fn add_histogram_with_buckets(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        bounds: Vec<f64>,
    ) -> Arc<Histogram> {
        let histogram = Arc::new(Histogram::with_buckets(name, help, bounds));
        self.inner.lock().histograms.push(Arc::clone(&histogram));
        histogram
    }

    /// Render every metric, grouped by type, blocks separated by blank lines.
    ///
    /// This is the body of `GET /metrics`.
    pub fn render(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        for counter in &inner.counters {
            out.push_str(&counter.render());
            out.push('\n');
        }
        for gauge in &inner.gauges {
            out.push_str(&gauge.render());
            out.push('\n');
        }
        for histogram in &inner.histograms {
            out.push_str(&histogram.render());
            out.push('\n');
        }
        out
    }
}
