//! Decoder for OpenAI-compatible chat-completion SSE streams (OpenAI, Z.AI/GLM,
//! OpenRouter and friends).

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::chunk::{Chunk, Usage};
use crate::decoder::{media_type, DecodeStats, DecodedStream, StreamDecoder};
use crate::decoders::preview;
use crate::error::{CoreResult, StreamError};
use crate::frame::{Frame, FrameReader, DEFAULT_MAX_EVENT_BYTES};
use crate::transport::ByteStream;

pub const ID: &str = "openai-compat";

const PROVIDERS: &[&str] = &["openai", "zai", "glm", "zhipu", "openrouter", "vllm", "lmstudio"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenAiCompatOptions {
    /// Cap on a single frame's `data` payload; 0 disables the check.
    pub max_event_bytes: usize,
    /// Hold the terminal chunk back from `finish_reason` until `[DONE]` or end of
    /// input, so a usage-only frame sent after the finish is not lost.
    pub await_trailing_usage: bool,
}

impl Default for OpenAiCompatOptions {
    fn default() -> Self {
        Self {
            max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
            await_trailing_usage: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatDecoder {
    opts: OpenAiCompatOptions,
}

impl OpenAiCompatDecoder {
    pub fn new(opts: OpenAiCompatOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &OpenAiCompatOptions {
        &self.opts
    }
}

impl StreamDecoder for OpenAiCompatDecoder {
    fn id(&self) -> &'static str {
        ID
    }

    fn supported_providers(&self) -> &'static [&'static str] {
        PROVIDERS
    }

    fn can_decode(&self, content_type: &str) -> bool {
        media_type(content_type) == "text/event-stream"
    }

    fn decode(&self, input: ByteStream) -> DecodedStream {
        DecodedStream::OpenAiCompat(OpenAiCompatStream::new(input, self.opts))
    }
}

// ---- Wire structs (tolerant: unknown fields ignored, nulls accepted) ----
#[derive(Deserialize)]
struct OAStreamChunk {
    #[serde(default)]
    choices: Option<Vec<OAChoice>>,
    /// A usage block of an unexpected shape is dropped, never the whole frame.
    #[serde(default, deserialize_with = "lenient_usage")]
    usage: Option<OAUsage>,
    #[serde(default)]
    error: Option<OAError>,
}

#[derive(Deserialize)]
struct OAChoice {
    #[serde(default)]
    delta: Option<OADelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OADelta {
    #[serde(default)]
    content: Option<String>,
    /// GLM-style thinking output.
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct OAUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

fn lenient_usage<'de, D>(de: D) -> Result<Option<OAUsage>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(de)?;
    Ok(raw.and_then(|v| serde_json::from_value(v).ok()))
}

#[derive(Deserialize)]
struct OAError {
    #[serde(default)]
    message: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Chunks decoded from one SSE response.
pub struct OpenAiCompatStream {
    frames: FrameReader,
    await_trailing_usage: bool,
    usage: Option<Usage>,
    /// Set once `finish_reason` was seen while waiting for trailing usage;
    /// holds the content and reasoning that arrived alongside it.
    deferred_terminal: Option<(Option<String>, Option<String>)>,
    malformed: u64,
    done: bool,
}

impl OpenAiCompatStream {
    pub fn new(input: ByteStream, opts: OpenAiCompatOptions) -> Self {
        Self {
            frames: FrameReader::with_max_event_bytes(input, opts.max_event_bytes),
            await_trailing_usage: opts.await_trailing_usage,
            usage: None,
            deferred_terminal: None,
            malformed: 0,
            done: false,
        }
    }

    pub fn stats(&self) -> DecodeStats {
        DecodeStats {
            bytes_received: self.frames.bytes_received(),
            units_read: self.frames.frames_read(),
            malformed_skipped: self.malformed,
            suppressed_events: 0,
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Most recent SSE `id` seen on the wire.
    pub fn last_event_id(&self) -> Option<&str> {
        self.frames.last_event_id()
    }

    fn terminal(&mut self) -> Chunk {
        let (content, reasoning) = self.deferred_terminal.take().unwrap_or_default();
        Chunk::terminal(content, self.usage).with_reasoning(reasoning)
    }

    fn on_frame(&mut self, frame: Frame) -> CoreResult<Option<Chunk>> {
        if frame.is_done() {
            return Ok(Some(self.terminal()));
        }

        let payload: OAStreamChunk = match serde_json::from_str(&frame.data) {
            Ok(p) => p,
            Err(e) => {
                self.malformed += 1;
                tracing::debug!(
                    decoder = ID,
                    error = %e,
                    preview = preview(&frame.data, 120),
                    "skipping malformed stream payload"
                );
                return Ok(None);
            }
        };

        if let Some(err) = payload.error {
            let message = err.message.unwrap_or_else(|| "unknown error".into());
            tracing::warn!(decoder = ID, message = %message, "vendor reported an error mid-stream");
            return Err(StreamError::Vendor {
                vendor: ID.into(),
                message,
            });
        }

        if let Some(u) = payload.usage {
            self.usage = Some(Usage::new(
                u.prompt_tokens.unwrap_or_default(),
                u.completion_tokens.unwrap_or_default(),
            ));
        }

        if self.deferred_terminal.is_some() {
            // Already finished; only trailing usage matters now.
            return Ok(None);
        }

        let Some(choice) = payload.choices.and_then(|c| c.into_iter().next()) else {
            return Ok(None);
        };
        let (content, reasoning) = match choice.delta {
            Some(d) => (non_empty(d.content), non_empty(d.reasoning_content)),
            None => (None, None),
        };

        if choice.finish_reason.is_some() {
            if self.await_trailing_usage {
                self.deferred_terminal = Some((content, reasoning));
                return Ok(None);
            }
            return Ok(Some(Chunk::terminal(content, self.usage).with_reasoning(reasoning)));
        }

        if content.is_none() && reasoning.is_none() {
            return Ok(None);
        }
        Ok(Some(Chunk {
            content_delta: content,
            reasoning_delta: reasoning,
            ..Default::default()
        }))
    }
}

impl Stream for OpenAiCompatStream {
    type Item = CoreResult<Chunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.frames).poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => match this.on_frame(frame) {
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
                    // No [DONE] and no finish_reason: close the sequence ourselves.
                    this.done = true;
                    return Poll::Ready(Some(Ok(this.terminal())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::from_chunks;
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn input(parts: &[&str]) -> ByteStream {
        from_chunks(
            parts
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_bytes()))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(mut s: DecodedStream) -> (Vec<CoreResult<Chunk>>, DecodeStats) {
        let mut out = Vec::new();
        while let Some(item) = s.next().await {
            out.push(item);
        }
        let stats = s.stats();
        (out, stats)
    }

    fn ok(items: Vec<CoreResult<Chunk>>) -> Vec<Chunk> {
        items.into_iter().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn content_then_done() {
        let dec = OpenAiCompatDecoder::default();
        let (items, stats) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], Chunk::content("Hi"));
        assert!(chunks[1].is_complete);
        assert_eq!(chunks[1].content_delta, None);
        assert_eq!(stats.units_read, 2);
        assert_eq!(stats.malformed_skipped, 0);
    }

    #[tokio::test]
    async fn nothing_is_emitted_after_done() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
    }

    #[tokio::test]
    async fn finish_reason_with_content_is_one_terminal_chunk() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"B\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_text_delta(), Some("A"));
        assert!(chunks[1].is_complete);
        assert_eq!(chunks[1].as_text_delta(), Some("B"));
        assert_eq!(chunks[1].final_usage, Some(Usage::new(3, 2)));
        assert_eq!(chunks.iter().filter(|c| c.is_complete).count(), 1);
    }

    #[tokio::test]
    async fn usage_is_last_write_wins_and_lands_on_done() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":9}}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].final_usage.is_none());
        assert_eq!(chunks[1].final_usage, Some(Usage::new(7, 9)));
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped() {
        let dec = OpenAiCompatDecoder::default();
        let (items, stats) = collect(dec.decode(input(&[
            "data: {not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_text_delta(), Some("ok"));
        assert_eq!(stats.malformed_skipped, 1);
    }

    #[tokio::test]
    async fn empty_and_null_deltas_emit_nothing() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":null}}],\"usage\":null}\n\n",
            "data: {\"choices\":null,\"id\":\"x\",\"model\":\"glm-4.6\"}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
    }

    #[tokio::test]
    async fn reasoning_content_becomes_reasoning_delta() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hmm\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks[0], Chunk::reasoning("hmm"));
    }

    #[tokio::test]
    async fn eof_without_done_synthesizes_terminal() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":1}}\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_complete);
        assert_eq!(chunks[1].final_usage, Some(Usage::new(2, 1)));
    }

    #[tokio::test]
    async fn empty_input_yields_only_terminal() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[]))).await;
        let chunks = ok(items);
        assert_eq!(chunks, vec![Chunk::terminal(None, None)]);
    }

    #[tokio::test]
    async fn trailing_usage_is_awaited_when_enabled() {
        let dec = OpenAiCompatDecoder::new(OpenAiCompatOptions {
            await_trailing_usage: true,
            ..Default::default()
        });
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"end\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert_eq!(chunks[0].as_text_delta(), Some("end"));
        assert_eq!(chunks[0].final_usage, Some(Usage::new(4, 5)));
    }

    #[tokio::test]
    async fn trailing_usage_is_dropped_by_default() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":5}}\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].final_usage, None);
    }

    #[tokio::test]
    async fn null_usage_field_keeps_frame_content() {
        let dec = OpenAiCompatDecoder::default();
        let (items, stats) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":null}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"!\"}}],\"usage\":{\"prompt_tokens\":\"n/a\"}}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_text_delta(), Some("Hello"));
        assert_eq!(chunks[1].as_text_delta(), Some("!"));
        assert_eq!(chunks[2].final_usage, Some(Usage::new(5, 0)));
        assert_eq!(stats.malformed_skipped, 0);
    }

    #[tokio::test]
    async fn reasoning_on_finish_frame_lands_on_terminal() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"think\"},\"finish_reason\":\"stop\"}]}\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_complete);
        assert_eq!(chunks[0].reasoning_delta.as_deref(), Some("think"));
    }

    #[tokio::test]
    async fn deferred_terminal_keeps_reasoning() {
        let dec = OpenAiCompatDecoder::new(OpenAiCompatOptions {
            await_trailing_usage: true,
            ..Default::default()
        });
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\",\"reasoning_content\":\"think\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        let chunks = ok(items);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_text_delta(), Some("ok"));
        assert_eq!(chunks[0].reasoning_delta.as_deref(), Some("think"));
        assert_eq!(chunks[0].final_usage, Some(Usage::new(1, 2)));
    }

    #[tokio::test]
    async fn in_band_error_fails_the_stream() {
        let dec = OpenAiCompatDecoder::default();
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"rate limited\",\"code\":\"1302\"}}\n\n",
            "data: [DONE]\n\n",
        ])))
        .await;
        assert_eq!(items.len(), 2);
        match &items[1] {
            Err(StreamError::Vendor { message, .. }) => assert_eq!(message, "rate limited"),
            other => panic!("expected vendor error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_fatal() {
        let dec = OpenAiCompatDecoder::new(OpenAiCompatOptions {
            max_event_bytes: 64,
            ..Default::default()
        });
        let big = format!("data: {}\n\n", "y".repeat(100));
        let (items, _) = collect(dec.decode(input(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            big.as_str(),
        ])))
        .await;
        assert!(items[0].is_ok());
        assert!(matches!(
            items.last(),
            Some(Err(StreamError::FrameTooLarge { max_bytes: 64, .. }))
        ));
        assert!(!items.iter().any(|r| matches!(r, Ok(c) if c.is_complete)));
    }
}
