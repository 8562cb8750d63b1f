//! Line splitting and Server-Sent-Event framing.
//!
//! `LineReader` turns a byte stream into text lines; `FrameReader` folds those
//! lines into SSE frames following the permissive SSE grammar. Both are lazy,
//! forward-only streams that cannot be restarted once they end.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_util::stream::Stream;

use crate::error::{CoreResult, StreamError};
use crate::transport::ByteStream;

/// Default cap on the `data` payload of a single frame (1 MiB).
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Slack allowed on top of the event cap for a single raw line (field name, colon, space).
const LINE_OVERHEAD_BYTES: usize = 1024;

/// Sentinel data value marking end-of-stream for OpenAI-style vendors.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// All `data:` lines of the event joined by `\n`.
    pub data: String,
    pub event_type: Option<String>,
    pub id: Option<String>,
    pub retry_ms: Option<u64>,
}

impl Frame {
    /// True if this frame carries the `[DONE]` end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data == DONE_SENTINEL
    }
}

/// Splits a byte stream into lines separated by `\n` (a trailing `\r` is dropped).
///
/// Bytes are buffered until a full line is available and only then decoded, so a
/// multi-byte character split across reads survives intact. An unterminated tail
/// is flushed as a final line at end of input.
pub struct LineReader {
    inner: ByteStream,
    buf: BytesMut,
    /// Offset up to which `buf` is known to contain no newline.
    scanned: usize,
    max_line_bytes: usize,
    bytes_received: u64,
    lines_read: u64,
    eof: bool,
    finished: bool,
}

impl LineReader {
    /// `max_line_bytes == 0` disables the pending-line bound.
    pub fn new(inner: ByteStream, max_line_bytes: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scanned: 0,
            max_line_bytes,
            bytes_received: 0,
            lines_read: 0,
            eof: false,
            finished: false,
        }
    }

    /// Total bytes pulled from the underlying stream so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    fn take_line(&mut self, newline_at: usize) -> String {
        let mut raw = self.buf.split_to(newline_at + 1);
        raw.truncate(newline_at);
        self.scanned = 0;
        self.finish_line(raw)
    }

    fn finish_line(&mut self, mut raw: BytesMut) -> String {
        if raw.last() == Some(&b'\r') {
            raw.truncate(raw.len() - 1);
        }
        self.lines_read += 1;
        String::from_utf8_lossy(&raw).into_owned()
    }
}

impl Stream for LineReader {
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            if let Some(pos) = this.buf[this.scanned..].iter().position(|b| *b == b'\n') {
                let line = this.take_line(this.scanned + pos);
                return Poll::Ready(Some(Ok(line)));
            }
            this.scanned = this.buf.len();

            if this.eof {
                this.finished = true;
                if this.buf.is_empty() {
                    return Poll::Ready(None);
                }
                let tail = this.buf.split();
                let line = this.finish_line(tail);
                return Poll::Ready(Some(Ok(line)));
            }

            if this.max_line_bytes > 0 && this.buf.len() > this.max_line_bytes {
                this.finished = true;
                tracing::warn!(
                    max_bytes = this.max_line_bytes,
                    buffered = this.buf.len(),
                    "line exceeds size limit"
                );
                return Poll::Ready(Some(Err(StreamError::FrameTooLarge {
                    max_bytes: this.max_line_bytes,
                    approx_bytes: this.buf.len(),
                })));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.bytes_received += chunk.len() as u64;
                    this.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(StreamError::Io(e))));
                }
                Poll::Ready(None) => this.eof = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Parses the SSE line protocol into [`Frame`]s.
///
/// Only a blank line that follows at least one `data:` field dispatches a frame;
/// comment lines (leading `:`) and unknown fields are skipped. The `data` buffer of
/// the frame being assembled is bounded by `max_event_bytes` (0 disables the check).
pub struct FrameReader {
    lines: LineReader,
    max_event_bytes: usize,
    data: String,
    has_data: bool,
    event_type: Option<String>,
    id: Option<String>,
    retry_ms: Option<u64>,
    last_event_id: Option<String>,
    frames_read: u64,
    finished: bool,
}

impl FrameReader {
    pub fn new(input: ByteStream) -> Self {
        Self::with_max_event_bytes(input, DEFAULT_MAX_EVENT_BYTES)
    }

    pub fn with_max_event_bytes(input: ByteStream, max_event_bytes: usize) -> Self {
        let max_line = if max_event_bytes == 0 {
            0
        } else {
            max_event_bytes.saturating_add(LINE_OVERHEAD_BYTES)
        };
        Self {
            lines: LineReader::new(input, max_line),
            max_event_bytes,
            data: String::new(),
            has_data: false,
            event_type: None,
            id: None,
            retry_ms: None,
            last_event_id: None,
            frames_read: 0,
            finished: false,
        }
    }

    pub fn max_event_bytes(&self) -> usize {
        self.max_event_bytes
    }

    /// Most recent `id` field seen on the stream, across frames.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn bytes_received(&self) -> u64 {
        self.lines.bytes_received()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn reset_pending(&mut self) {
        self.data.clear();
        self.has_data = false;
        self.event_type = None;
        self.id = None;
        self.retry_ms = None;
    }

    fn dispatch(&mut self) -> Frame {
        let frame = Frame {
            data: std::mem::take(&mut self.data),
            event_type: self.event_type.take(),
            id: self.id.take(),
            retry_ms: self.retry_ms.take(),
        };
        self.has_data = false;
        self.frames_read += 1;
        tracing::trace!(
            event = frame.event_type.as_deref().unwrap_or("message"),
            len = frame.data.len(),
            "sse frame"
        );
        frame
    }

    /// Applies one non-blank line to the frame under construction.
    fn apply_line(&mut self, line: &str) -> CoreResult<()> {
        if line.starts_with(':') {
            return Ok(());
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => {
                let separator = usize::from(self.has_data);
                let new_len = self.data.len() + separator + value.len();
                if self.max_event_bytes > 0 && new_len > self.max_event_bytes {
                    tracing::warn!(
                        max_bytes = self.max_event_bytes,
                        approx_bytes = new_len,
                        "sse event exceeds size limit"
                    );
                    return Err(StreamError::FrameTooLarge {
                        max_bytes: self.max_event_bytes,
                        approx_bytes: new_len,
                    });
                }
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => {
                self.id = Some(value.to_string());
                self.last_event_id = Some(value.to_string());
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry_ms = Some(ms);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Stream for FrameReader {
    type Item = CoreResult<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.lines).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    if line.is_empty() {
                        if this.has_data {
                            return Poll::Ready(Some(Ok(this.dispatch())));
                        }
                        this.reset_pending();
                        continue;
                    }
                    if let Err(e) = this.apply_line(&line) {
                        this.finished = true;
                        this.reset_pending();
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    this.reset_pending();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    if this.has_data {
                        return Poll::Ready(Some(Ok(this.dispatch())));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
