//! Decoded output primitives exposed by chunkwire.
//!
//! Contract:
//! - Decoders emit 0..n delta chunks (`content_delta` and/or `reasoning_delta`).
//! - A successful sequence ends with exactly one terminal chunk (`is_complete == true`).
//! - `final_usage` is only ever set on the terminal chunk.
//! - After the terminal chunk, no further chunks are emitted.

use serde::{Deserialize, Serialize};

/// Token usage reported by a vendor. Later reports overwrite earlier ones.
/// The NDJSON decoder merges per field: only the fields a report carries are overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One unit of decoded, vendor-agnostic output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content_delta: Option<String>,
    pub reasoning_delta: Option<String>,
    pub is_complete: bool,
    pub final_usage: Option<Usage>,
}

impl Chunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content_delta: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning_delta: Some(text.into()),
            ..Default::default()
        }
    }

    /// Terminal chunk, optionally carrying trailing content from the same payload.
    pub fn terminal(content: Option<String>, usage: Option<Usage>) -> Self {
        Self {
            content_delta: content.filter(|s| !s.is_empty()),
            reasoning_delta: None,
            is_complete: true,
            final_usage: usage,
        }
    }

    /// Attaches reasoning text that arrived in the same payload as the finish signal.
    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning_delta = reasoning.filter(|s| !s.is_empty());
        self
    }

    /// Convenience accessor for `content_delta`.
    pub fn as_text_delta(&self) -> Option<&str> {
        self.content_delta.as_deref()
    }
}
