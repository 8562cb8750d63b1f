use std::time::Duration;

use serde::Serialize;

use crate::cancel::{CancellationController, CancellationReason};
use crate::chunk::Usage;
use crate::decoder::DecodeStats;
use crate::error::StreamError;
use crate::telemetry::keys::*;

/// Immutable record of one finished stream. Built once via [`DiagnosticsBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamDiagnostics {
    decoder_id: String,
    vendor_id: String,
    elapsed_ms: u64,
    time_to_first_chunk_ms: Option<u64>,
    chunk_count: u64,
    bytes_received: u64,
    malformed_skipped: u64,
    suppressed_events: u64,
    usage: Option<Usage>,
    success: bool,
    cancellation_reason: Option<CancellationReason>,
    error_kind: Option<String>,
    error_message: Option<String>,
}

impl StreamDiagnostics {
    pub fn decoder_id(&self) -> &str {
        &self.decoder_id
    }
    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
    pub fn time_to_first_chunk(&self) -> Option<Duration> {
        self.time_to_first_chunk_ms.map(Duration::from_millis)
    }
    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
    pub fn malformed_skipped(&self) -> u64 {
        self.malformed_skipped
    }
    pub fn suppressed_events(&self) -> u64 {
        self.suppressed_events
    }
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }
    pub fn success(&self) -> bool {
        self.success
    }
    pub fn cancellation_reason(&self) -> Option<CancellationReason> {
        self.cancellation_reason
    }
    pub fn error_kind(&self) -> Option<&str> {
        self.error_kind.as_deref()
    }
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Flattened key/value view using the stable telemetry keys.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attrs = vec![
            (KEY_DECODER, self.decoder_id.clone()),
            (KEY_VENDOR, self.vendor_id.clone()),
            (KEY_ELAPSED_MS, self.elapsed_ms.to_string()),
            (KEY_CHUNKS, self.chunk_count.to_string()),
            (KEY_BYTES, self.bytes_received.to_string()),
        ];
        if let Some(ms) = self.time_to_first_chunk_ms {
            attrs.push((KEY_FIRST_CHUNK_MS, ms.to_string()));
        }
        if let Some(u) = self.usage {
            attrs.push((KEY_TOKENS_INPUT, u.input_tokens.to_string()));
            attrs.push((KEY_TOKENS_OUTPUT, u.output_tokens.to_string()));
        }
        if let Some(reason) = self.cancellation_reason {
            attrs.push((KEY_CANCEL_REASON, reason.as_str().to_string()));
        }
        if let Some(kind) = &self.error_kind {
            attrs.push((KEY_ERROR_KIND, kind.clone()));
        }
        if let Some(msg) = &self.error_message {
            attrs.push((KEY_ERROR_MESSAGE, msg.clone()));
        }
        attrs
    }
}

/// Accumulates counters while a stream is consumed and seals them into a record.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsBuilder {
    decoder_id: String,
    vendor_id: String,
    elapsed: Duration,
    time_to_first_chunk: Option<Duration>,
    chunk_count: u64,
    stats: DecodeStats,
    usage: Option<Usage>,
}

impl DiagnosticsBuilder {
    pub fn new(decoder_id: impl Into<String>, vendor_id: impl Into<String>) -> Self {
        Self {
            decoder_id: decoder_id.into(),
            vendor_id: vendor_id.into(),
            ..Default::default()
        }
    }

    /// Copies timing and chunk counts from the stream's controller.
    pub fn timing_from(mut self, controller: &CancellationController) -> Self {
        self.elapsed = controller.elapsed();
        self.time_to_first_chunk = controller.time_to_first_chunk();
        self.chunk_count = controller.chunks_received();
        self
    }

    pub fn elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn time_to_first_chunk(mut self, ttfc: Option<Duration>) -> Self {
        self.time_to_first_chunk = ttfc;
        self
    }

    pub fn chunk_count(mut self, n: u64) -> Self {
        self.chunk_count = n;
        self
    }

    pub fn stats(mut self, stats: DecodeStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    fn seal(self, success: bool) -> StreamDiagnostics {
        StreamDiagnostics {
            decoder_id: self.decoder_id,
            vendor_id: self.vendor_id,
            elapsed_ms: self.elapsed.as_millis() as u64,
            time_to_first_chunk_ms: self.time_to_first_chunk.map(|d| d.as_millis() as u64),
            chunk_count: self.chunk_count,
            bytes_received: self.stats.bytes_received,
            malformed_skipped: self.stats.malformed_skipped,
            suppressed_events: self.stats.suppressed_events,
            usage: self.usage,
            success,
            cancellation_reason: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn success(self) -> StreamDiagnostics {
        self.seal(true)
    }

    pub fn failure(self, err: &StreamError) -> StreamDiagnostics {
        let mut d = self.seal(false);
        d.cancellation_reason = err.cancellation_reason();
        d.error_kind = Some(err.kind().to_string());
        d.error_message = Some(err.to_string());
        d
    }
}
