//! Telemetry hooks for finished streams.
//! By default, nothing is recorded unless a sink is installed via `set_diagnostics_sink`.

pub mod keys;
#[cfg(test)]
pub mod test_capture;

pub use keys::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::diagnostics::StreamDiagnostics;

/// Implement this to receive a diagnostics record for every finished stream.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record` **may** be called from any thread; implementations should avoid panicking.
/// - Keep overhead minimal; this runs once per stream on the completion path.
pub trait DiagnosticsSink: Send + Sync + 'static {
    fn record(&self, diagnostics: &StreamDiagnostics);
}

static DIAGNOSTICS_SINK: OnceCell<Arc<dyn DiagnosticsSink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global diagnostics sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_diagnostics_sink(sink: Arc<dyn DiagnosticsSink>) -> bool {
    DIAGNOSTICS_SINK.set(sink).is_ok()
}

/// Forward a finished record to the installed sink, if any.
///
/// In tests, emission is suppressed unless explicitly enabled via `test_set_capture_enabled`.
#[inline]
pub(crate) fn emit(diagnostics: &StreamDiagnostics) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = DIAGNOSTICS_SINK.get() {
        sink.record(diagnostics);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable sink emission for the current test thread.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
