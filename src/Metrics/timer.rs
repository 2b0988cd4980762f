use super::ObservabilitySink;
use std::time::{Duration, Instant};

/// Scoped timer: starts on construction and reports to its sink when
/// dropped, whichever way the enclosing scope is left (return, `?`, panic).
///
/// With no sink attached the timer does nothing, and the context closure is
/// never run.
#[must_use = "the timer reports when dropped; binding it to `_` drops it at once"]
pub struct PerfTimer<'a, C: FnOnce() -> String = fn() -> String> {
    sink: Option<&'a dyn ObservabilitySink>,
    label: &'a str,
    context: Option<C>,
    start: Instant,
}

impl<'a> PerfTimer<'a> {
    pub fn new(sink: Option<&'a dyn ObservabilitySink>, label: &'a str) -> Self {
        Self::with_context(sink, label, String::new)
    }
}

impl<'a, C: FnOnce() -> String> PerfTimer<'a, C> {
    /// Timer whose record carries the text `context` produces.
    pub fn with_context(sink: Option<&'a dyn ObservabilitySink>, label: &'a str, context: C) -> Self {
        Self {
            sink,
            label,
            context: Some(context),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<C: FnOnce() -> String> Drop for PerfTimer<'_, C> {
    fn drop(&mut self) {
        let Some(sink) = self.sink else { return };
        let elapsed = self.start.elapsed();
        let context = self.context.take().map(|f| f()).unwrap_or_default();
        sink.record(self.label, elapsed, &context);
    }
}
