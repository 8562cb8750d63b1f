//! Decoder contract and the closed set of built-in vendor decoders.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde::Serialize;

use crate::chunk::{Chunk, Usage};
use crate::decoders::claude_cli::{ClaudeCliDecoder, ClaudeCliStream};
use crate::decoders::openai_compat::{OpenAiCompatDecoder, OpenAiCompatStream};
use crate::error::CoreResult;
use crate::event_log::RateLimitedEventLog;
use crate::transport::ByteStream;

/// Counters a decoder keeps while consuming its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub bytes_received: u64,
    /// SSE frames or NDJSON lines read.
    pub units_read: u64,
    pub malformed_skipped: u64,
    pub suppressed_events: u64,
}

/// What every vendor decoder provides.
///
/// Requirements for `decode`:
/// - yield each chunk as soon as its source frame/line is parsed;
/// - skip malformed individual payloads instead of failing the stream;
/// - end with exactly one terminal chunk, synthesizing it if the input ends
///   without an explicit completion marker.
pub trait StreamDecoder: Send + Sync {
    /// Stable identifier, e.g. `"openai-compat"`.
    fn id(&self) -> &'static str;

    /// Upstream provider ids this decoder is built for.
    fn supported_providers(&self) -> &'static [&'static str];

    /// Content-type sniffing (`text/event-stream`, ...).
    fn can_decode(&self, content_type: &str) -> bool;

    /// Stronger check used to pick one decoder when several accept a content type.
    fn can_decode_for_provider(&self, provider_id: &str, content_type: &str) -> bool {
        self.supported_providers()
            .iter()
            .any(|p| p.eq_ignore_ascii_case(provider_id))
            && self.can_decode(content_type)
    }

    fn decode(&self, input: ByteStream) -> DecodedStream;
}

/// Normalized media type: parameters dropped, trimmed, lowercased.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Built-in decoders.
#[derive(Debug, Clone)]
pub enum Decoder {
    OpenAiCompat(OpenAiCompatDecoder),
    ClaudeCli(ClaudeCliDecoder),
}

impl StreamDecoder for Decoder {
    fn id(&self) -> &'static str {
        match self {
            Decoder::OpenAiCompat(d) => d.id(),
            Decoder::ClaudeCli(d) => d.id(),
        }
    }

    fn supported_providers(&self) -> &'static [&'static str] {
        match self {
            Decoder::OpenAiCompat(d) => d.supported_providers(),
            Decoder::ClaudeCli(d) => d.supported_providers(),
        }
    }

    fn can_decode(&self, content_type: &str) -> bool {
        match self {
            Decoder::OpenAiCompat(d) => d.can_decode(content_type),
            Decoder::ClaudeCli(d) => d.can_decode(content_type),
        }
    }

    fn can_decode_for_provider(&self, provider_id: &str, content_type: &str) -> bool {
        match self {
            Decoder::OpenAiCompat(d) => d.can_decode_for_provider(provider_id, content_type),
            Decoder::ClaudeCli(d) => d.can_decode_for_provider(provider_id, content_type),
        }
    }

    fn decode(&self, input: ByteStream) -> DecodedStream {
        match self {
            Decoder::OpenAiCompat(d) => d.decode(input),
            Decoder::ClaudeCli(d) => d.decode(input),
        }
    }
}

impl From<OpenAiCompatDecoder> for Decoder {
    fn from(d: OpenAiCompatDecoder) -> Self {
        Decoder::OpenAiCompat(d)
    }
}

impl From<ClaudeCliDecoder> for Decoder {
    fn from(d: ClaudeCliDecoder) -> Self {
        Decoder::ClaudeCli(d)
    }
}

/// Lazy chunk sequence produced by a decoder. Forward-only; once it yields
/// `None` (or an error) it yields nothing more.
pub enum DecodedStream {
    OpenAiCompat(OpenAiCompatStream),
    ClaudeCli(ClaudeCliStream),
}

impl DecodedStream {
    pub fn stats(&self) -> DecodeStats {
        match self {
            DecodedStream::OpenAiCompat(s) => s.stats(),
            DecodedStream::ClaudeCli(s) => s.stats(),
        }
    }

    /// Latest usage observed so far.
    pub fn usage(&self) -> Option<Usage> {
        match self {
            DecodedStream::OpenAiCompat(s) => s.usage(),
            DecodedStream::ClaudeCli(s) => s.usage(),
        }
    }

    /// The unknown-event log, for decoders that keep one.
    pub fn event_log_mut(&mut self) -> Option<&mut RateLimitedEventLog> {
        match self {
            DecodedStream::OpenAiCompat(_) => None,
            DecodedStream::ClaudeCli(s) => Some(s.event_log_mut()),
        }
    }
}

impl Stream for DecodedStream {
    type Item = CoreResult<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            DecodedStream::OpenAiCompat(s) => Pin::new(s).poll_next(cx),
            DecodedStream::ClaudeCli(s) => Pin::new(s).poll_next(cx),
        }
    }
}
