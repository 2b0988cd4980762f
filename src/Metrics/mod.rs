// Timing of cache calls, reported to a pluggable sink.

pub mod sinks;
pub mod timer;

pub use sinks::{MetricsSink, RecordingSink, TimingRecord, TracingSink};
pub use timer::PerfTimer;

use std::time::Duration;

/// Receives one record per timed operation.
///
/// Called outside the cache lock, on the calling thread. A sink must not
/// call back into the cache it observes.
pub trait ObservabilitySink: Send + Sync {
    fn record(&self, label: &str, elapsed: Duration, context: &str);
}

impl<S: ObservabilitySink + ?Sized> ObservabilitySink for std::sync::Arc<S> {
    fn record(&self, label: &str, elapsed: Duration, context: &str) {
        (**self).record(label, elapsed, context)
    }
}
