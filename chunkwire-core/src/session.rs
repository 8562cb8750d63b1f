//! Consumer-side driver for one stream.
//!
//! Runs a decoder under a [`CancellationController`], aggregates the chunks,
//! and seals a [`StreamDiagnostics`] record whether the stream succeeds or not.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::cancel::CancellationController;
use crate::chunk::{Chunk, Usage};
use crate::decoder::{Decoder, StreamDecoder};
use crate::diagnostics::{DiagnosticsBuilder, StreamDiagnostics};
use crate::error::{CoreResult, StreamError};
use crate::event_log::SuppressionSummary;
use crate::policy::TimeoutPolicy;
use crate::telemetry;
use crate::transport::ByteStream;

/// Everything aggregated from the chunks that were delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    pub text: String,
    pub reasoning: String,
    pub usage: Option<Usage>,
    pub chunks: u64,
    pub completed: bool,
}

impl StreamOutcome {
    fn absorb(&mut self, chunk: &Chunk) {
        self.chunks += 1;
        if let Some(t) = &chunk.content_delta {
            self.text.push_str(t);
        }
        if let Some(r) = &chunk.reasoning_delta {
            self.reasoning.push_str(r);
        }
        if chunk.is_complete {
            self.completed = true;
            self.usage = chunk.final_usage;
        }
    }
}

/// Result of [`StreamSession::run`]. `outcome` holds whatever arrived before
/// an error, so partial output is never lost.
#[derive(Debug)]
pub struct SessionReport {
    pub outcome: StreamOutcome,
    pub error: Option<StreamError>,
    pub diagnostics: StreamDiagnostics,
    pub suppressed: Option<SuppressionSummary>,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> CoreResult<StreamOutcome> {
        match self.error {
            None => Ok(self.outcome),
            Some(e) => Err(e),
        }
    }
}

pub struct StreamSession<'a> {
    decoder: &'a Decoder,
    vendor_id: String,
    policy: TimeoutPolicy,
    cancel: Option<CancellationToken>,
}

impl<'a> StreamSession<'a> {
    pub fn new(decoder: &'a Decoder, vendor_id: impl Into<String>) -> Self {
        Self {
            decoder,
            vendor_id: vendor_id.into(),
            policy: TimeoutPolicy::default(),
            cancel: None,
        }
    }

    pub fn with_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cancelling `token` stops the stream at its next suspension point.
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Drains `input` through the decoder, calling `on_chunk` for every chunk as
    /// it is delivered.
    pub async fn run<F>(self, input: ByteStream, mut on_chunk: F) -> SessionReport
    where
        F: FnMut(&Chunk),
    {
        let decoder_id = self.decoder.id();
        let span = tracing::info_span!(
            "chunkwire.stream",
            decoder = decoder_id,
            vendor = %self.vendor_id
        );

        async move {
            let mut controller = match &self.cancel {
                Some(token) => CancellationController::new(self.policy, token),
                None => CancellationController::standalone(self.policy),
            };
            let mut decoded = self.decoder.decode(input);
            let mut outcome = StreamOutcome::default();

            let error = loop {
                match controller.guard(decoded.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        controller.on_chunk_received();
                        outcome.absorb(&chunk);
                        on_chunk(&chunk);
                        if chunk.is_complete {
                            controller.complete();
                            break None;
                        }
                    }
                    Ok(Some(Err(e))) => break Some(e),
                    Ok(None) => {
                        // Decoders always close with a terminal chunk; treat a bare end the same.
                        controller.complete();
                        break None;
                    }
                    Err(e) => break Some(e),
                }
            };

            let suppressed = decoded.event_log_mut().and_then(|log| log.log_summary());
            let builder = DiagnosticsBuilder::new(decoder_id, self.vendor_id.as_str())
                .timing_from(&controller)
                .stats(decoded.stats())
                .usage(outcome.usage.or_else(|| decoded.usage()));
            let diagnostics = match &error {
                None => {
                    tracing::debug!(
                        chunks = controller.chunks_received(),
                        elapsed_ms = controller.elapsed().as_millis() as u64,
                        "stream completed"
                    );
                    builder.success()
                }
                Some(e) => {
                    if e.cancellation_reason().is_some() {
                        tracing::warn!(error = %e, kind = e.kind(), "stream aborted");
                    } else {
                        tracing::warn!(error = %e, kind = e.kind(), "stream failed");
                    }
                    builder.failure(e)
                }
            };
            telemetry::emit(&diagnostics);

            SessionReport {
                outcome,
                error,
                diagnostics,
                suppressed,
            }
        }
        .instrument(span)
        .await
    }

    /// [`run`](Self::run) without a per-chunk callback.
    pub async fn collect(self, input: ByteStream) -> SessionReport {
        self.run(input, |_| {}).await
    }
}
