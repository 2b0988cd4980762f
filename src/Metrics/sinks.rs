use super::ObservabilitySink;
use crate::error::{CacheError, CacheResult};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Logs every timing at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record(&self, label: &str, elapsed: Duration, context: &str) {
        tracing::debug!(
            operation = label,
            elapsed_us = elapsed.as_micros() as u64,
            context,
            "cache call"
        );
    }
}

/// Prometheus latency histogram and call counter, both labelled by
/// operation.
#[derive(Clone)]
pub struct MetricsSink {
    registry: Registry,
    latency: HistogramVec,
    calls: IntCounterVec,
}

lazy_static! {
    static ref GLOBAL: Option<MetricsSink> = match MetricsSink::new("rtb_datacache") {
        Ok(sink) => Some(sink),
        Err(e) => {
            tracing::error!(error = %e, "cannot register cache metrics");
            None
        }
    };
}

impl MetricsSink {
    /// A sink with its own registry; metric names start with `prefix`.
    pub fn new(prefix: &str) -> CacheResult<Self> {
        let latency = HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_operation_latency_seconds"),
                "Cache operation latency in seconds",
            )
            .buckets(vec![
                0.000_001, 0.000_005, 0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01,
            ]),
            &["operation"],
        )
        .map_err(metrics_error)?;
        let calls = IntCounterVec::new(
            Opts::new(format!("{prefix}_operations_total"), "Cache operations"),
            &["operation"],
        )
        .map_err(metrics_error)?;

        let registry = Registry::new();
        registry.register(Box::new(latency.clone())).map_err(metrics_error)?;
        registry.register(Box::new(calls.clone())).map_err(metrics_error)?;
        Ok(Self {
            registry,
            latency,
            calls,
        })
    }

    /// Process-wide instance, `None` if it could not be registered.
    pub fn global() -> Option<&'static MetricsSink> {
        GLOBAL.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Calls counted for `label`.
    pub fn calls(&self, label: &str) -> u64 {
        self.calls.with_label_values(&[label]).get()
    }

    /// Text exposition of everything in the registry.
    pub fn gather_text(&self) -> CacheResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| CacheError::Config {
            message: format!("metrics exposition is not UTF-8: {e}"),
        })
    }
}

impl ObservabilitySink for MetricsSink {
    fn record(&self, label: &str, elapsed: Duration, _context: &str) {
        self.latency
            .with_label_values(&[label])
            .observe(elapsed.as_secs_f64());
        self.calls.with_label_values(&[label]).inc();
    }
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink").finish_non_exhaustive()
    }
}

fn metrics_error(e: prometheus::Error) -> CacheError {
    CacheError::Config {
        message: format!("metrics: {e}"),
    }
}

/// One timing as seen by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingRecord {
    pub label: String,
    pub elapsed: Duration,
    pub context: String,
}

/// Keeps every timing in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<TimingRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far, oldest first.
    pub fn records(&self) -> Vec<TimingRecord> {
        self.records.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.label.clone()).collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl ObservabilitySink for RecordingSink {
    fn record(&self, label: &str, elapsed: Duration, context: &str) {
        self.records.lock().push(TimingRecord {
            label: label.to_string(),
            elapsed,
            context: context.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_sink_counts_and_exports() {
        let sink = MetricsSink::new("test_cache").unwrap();
        sink.record("insert", Duration::from_micros(3), "");
        sink.record("insert", Duration::from_micros(5), "");
        sink.record("remove", Duration::from_micros(1), "");
        assert_eq!(sink.calls("insert"), 2);
        assert_eq!(sink.calls("remove"), 1);

        let text = sink.gather_text().unwrap();
        assert!(text.contains("test_cache_operations_total"));
        assert!(text.contains("operation=\"insert\""));
    }

    #[test]
    fn global_sink_is_shared() {
        let a = MetricsSink::global().unwrap();
        let b = MetricsSink::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
