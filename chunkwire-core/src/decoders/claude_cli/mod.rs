//! Decoder for the newline-delimited JSON event stream printed by Anthropic-style
//! CLI subprocesses (`claude -p --output-format stream-json`).
//!
//! Each line is one event object with a `type` field. Lines wrapped as
//! `{"type":"stream_event","event":{...}}` are unwrapped first.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::Value;

use crate::chunk::{Chunk, Usage};
use crate::decoder::{media_type, DecodeStats, DecodedStream, StreamDecoder};
use crate::decoders::preview;
use crate::error::{CoreResult, StreamError};
use crate::event_log::{RateLimitedEventLog, DEFAULT_MAX_UNIQUE_EVENTS};
use crate::frame::{LineReader, DEFAULT_MAX_EVENT_BYTES};
use crate::transport::ByteStream;

pub const ID: &str = "claude-cli";

const PROVIDERS: &[&str] = &["claude-code", "claude-cli"];

const CONTENT_TYPES: &[&str] = &[
    "application/x-ndjson",
    "application/ndjson",
    "application/jsonl",
    "application/x-jsonlines",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaudeCliOptions {
    /// Cap on a single NDJSON line; 0 disables the check.
    pub max_line_bytes: usize,
    /// Distinct unknown event types logged before suppression kicks in.
    pub max_unique_events: usize,
}

impl Default for ClaudeCliOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_EVENT_BYTES,
            max_unique_events: DEFAULT_MAX_UNIQUE_EVENTS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClaudeCliDecoder {
    opts: ClaudeCliOptions,
}

impl ClaudeCliDecoder {
    pub fn new(opts: ClaudeCliOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ClaudeCliOptions {
        &self.opts
    }
}

impl StreamDecoder for ClaudeCliDecoder {
    fn id(&self) -> &'static str {
        ID
    }

    fn supported_providers(&self) -> &'static [&'static str] {
        PROVIDERS
    }

    fn can_decode(&self, content_type: &str) -> bool {
        let mt = media_type(content_type);
        CONTENT_TYPES.contains(&mt.as_str())
    }

    /// Subprocess output has no content type, so an empty one is accepted here.
    fn can_decode_for_provider(&self, provider_id: &str, content_type: &str) -> bool {
        PROVIDERS.iter().any(|p| p.eq_ignore_ascii_case(provider_id))
            && (content_type.trim().is_empty() || self.can_decode(content_type))
    }

    fn decode(&self, input: ByteStream) -> DecodedStream {
        DecodedStream::ClaudeCli(ClaudeCliStream::new(input, self.opts))
    }
}

// ---- Wire structs ----
// Lines are parsed as `Value` first; typed fields are only read once the
// `type` is recognized, so new event shapes never count as malformed.
#[derive(Deserialize)]
struct CliDelta {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

struct CliUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl CliUsage {
    /// Non-integer token counts are treated as not reported.
    fn from_value(v: &Value) -> Self {
        Self {
            input_tokens: v.get("input_tokens").and_then(Value::as_u64),
            output_tokens: v.get("output_tokens").and_then(Value::as_u64),
        }
    }
}

fn error_message(err: Option<&Value>, message: Option<&Value>) -> String {
    match (err, message) {
        (Some(Value::String(s)), _) => s.clone(),
        (Some(Value::Object(map)), _) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        (_, Some(Value::String(s))) => s.clone(),
        _ => "unknown error".to_string(),
    }
}

fn usage_of(event: &Value) -> Option<CliUsage> {
    event.get("usage").map(CliUsage::from_value)
}

/// `message_start` nests its usage inside `message`.
fn message_usage(event: &Value) -> Option<CliUsage> {
    event.get("message").and_then(usage_of)
}

/// Chunks decoded from one CLI subprocess run.
pub struct ClaudeCliStream {
    lines: LineReader,
    log: RateLimitedEventLog,
    usage: Option<Usage>,
    malformed: u64,
    done: bool,
}

impl ClaudeCliStream {
    pub fn new(input: ByteStream, opts: ClaudeCliOptions) -> Self {
        Self {
            lines: LineReader::new(input, opts.max_line_bytes),
            log: RateLimitedEventLog::new(ID, opts.max_unique_events),
            usage: None,
            malformed: 0,
            done: false,
        }
    }

    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            bytes_received: self.lines.bytes_received(),
            units_read: self.lines.lines_read(),
            malformed_skipped: self.malformed,
            suppressed_events: self.log.total_suppressed(),
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    pub fn event_log_mut(&mut self) -> &mut RateLimitedEventLog {
        &mut self.log
    }

    /// Only the fields present in `reported` overwrite what we already have.
    fn merge_usage(&mut self, reported: Option<CliUsage>) {
        let Some(u) = reported else { return };
        if u.input_tokens.is_none() && u.output_tokens.is_none() {
            return;
        }
        let mut current = self.usage.unwrap_or_default();
        if let Some(n) = u.input_tokens {
            current.input_tokens = n;
        }
        if let Some(n) = u.output_tokens {
            current.output_tokens = n;
        }
        self.usage = Some(current);
    }

    fn on_line(&mut self, line: &str) -> CoreResult<Option<Chunk>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let event: Value = match serde_json::from_str(line) {
            Ok(ev) => ev,
            Err(e) => {
                self.malformed += 1;
                tracing::debug!(
                    decoder = ID,
                    error = %e,
                    preview = preview(line, 120),
                    "skipping malformed stream line"
                );
                return Ok(None);
            }
        };
        self.on_event(&event)
    }

    fn on_event(&mut self, event: &Value) -> CoreResult<Option<Chunk>> {
        let Some(kind) = event.get("type").and_then(Value::as_str) else {
            self.malformed += 1;
            tracing::debug!(decoder = ID, "stream line without a string `type`");
            return Ok(None);
        };
        match kind {
            "stream_event" => match event.get("event").filter(|inner| inner.is_object()) {
                Some(inner) => self.on_event(inner),
                None => {
                    self.malformed += 1;
                    tracing::debug!(decoder = ID, "stream_event without an inner event");
                    Ok(None)
                }
            },
            "content_block_delta" => {
                let Some(delta) = event
                    .get("delta")
                    .and_then(|d| CliDelta::deserialize(d).ok())
                else {
                    return Ok(None);
                };
                let chunk = match delta.kind.as_deref() {
                    Some("text_delta") => delta
                        .text
                        .filter(|t| !t.is_empty())
                        .map(Chunk::content),
                    Some("thinking_delta") => delta
                        .thinking
                        .filter(|t| !t.is_empty())
                        .map(Chunk::reasoning),
                    // signature_delta, input_json_delta and similar carry no text
                    _ => None,
                };
                Ok(chunk)
            }
            "message_start" => {
                self.merge_usage(message_usage(event));
                Ok(None)
            }
            "message_delta" => {
                self.merge_usage(usage_of(event));
                Ok(None)
            }
            "message_stop" | "result" => {
                self.merge_usage(usage_of(event));
                Ok(Some(Chunk::terminal(None, self.usage)))
            }
            "content_block_start" | "content_block_stop" | "ping" => Ok(None),
            "error" => {
                let message = error_message(event.get("error"), event.get("message"));
                tracing::warn!(decoder = ID, message = %message, "vendor reported an error mid-stream");
                Err(StreamError::Vendor {
                    vendor: ID.into(),
                    message,
                })
            }
            other => {
                self.log.record(other);
                Ok(None)
            }
        }
    }
}

impl Stream for ClaudeCliStream {
    type Item = CoreResult<Chunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.lines).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => match this.on_line(&line) {
                    Ok(Some(chunk)) => {
                        this.done = chunk.is_complete;
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    // Process exited without message_stop/result.
                    this.done = true;
                    return Poll::Ready(Some(Ok(Chunk::terminal(None, this.usage))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
