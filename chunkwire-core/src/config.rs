use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::decoders::claude_cli::ClaudeCliOptions;
use crate::decoders::openai_compat::OpenAiCompatOptions;
use crate::error::{CoreResult, StreamError};
use crate::event_log::DEFAULT_MAX_UNIQUE_EVENTS;
use crate::frame::DEFAULT_MAX_EVENT_BYTES;
use crate::policy::{Preset, TimeoutPolicy};
use crate::transport::DEFAULT_BUFFER_BYTES;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TimeoutCfg {
    #[serde(default)]
    pub preset: Preset,
    /// Overrides the preset's first-chunk limit.
    #[serde(default)]
    pub first_chunk_ms: Option<u64>,
    #[serde(default)]
    pub inter_chunk_ms: Option<u64>,
    #[serde(default)]
    pub total_ms: Option<u64>,
}

impl TimeoutCfg {
    /// Preset values with any overrides applied; zero durations are rejected.
    pub fn to_policy(&self) -> CoreResult<TimeoutPolicy> {
        let base = self.preset.policy();
        let pick = |ms: Option<u64>, fallback: Duration| ms.map(Duration::from_millis).unwrap_or(fallback);
        TimeoutPolicy::new(
            pick(self.first_chunk_ms, base.first_chunk()),
            pick(self.inter_chunk_ms, base.inter_chunk()),
            pick(self.total_ms, base.total_stream()),
        )
    }
}

fn default_max_event_bytes() -> usize {
    DEFAULT_MAX_EVENT_BYTES
}
fn default_buffer_bytes() -> usize {
    DEFAULT_BUFFER_BYTES
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReaderCfg {
    /// Max bytes in one SSE event or NDJSON line; 0 disables the guard.
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
    /// Read buffer for `AsyncRead` transports.
    #[serde(default = "default_buffer_bytes")]
    pub buffer_bytes: usize,
}

impl Default for ReaderCfg {
    fn default() -> Self {
        Self {
            max_event_bytes: default_max_event_bytes(),
            buffer_bytes: default_buffer_bytes(),
        }
    }
}

fn default_max_unique_events() -> usize {
    DEFAULT_MAX_UNIQUE_EVENTS
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EventLogCfg {
    #[serde(default = "default_max_unique_events")]
    pub max_unique_events: usize,
}

impl Default for EventLogCfg {
    fn default() -> Self {
        Self {
            max_unique_events: default_max_unique_events(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct OpenAiCompatCfg {
    #[serde(default)]
    pub await_trailing_usage: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    /// Regex applied to the provider id, e.g. ^glm-.*
    pub provider: String,
    /// Decoder id to use when this rule matches
    pub decoder: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RoutingCfg {
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutCfg,
    #[serde(default)]
    pub reader: ReaderCfg,
    #[serde(default)]
    pub event_log: EventLogCfg,
    #[serde(default)]
    pub openai_compat: OpenAiCompatCfg,
    #[serde(default)]
    pub routing: RoutingCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(StreamError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| StreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| StreamError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into())))?,
        };
        // Surface bad timeout values at load time rather than at first stream.
        cfg.timeouts.to_policy()?;
        Ok(cfg)
    }

    pub fn openai_compat_options(&self) -> OpenAiCompatOptions {
        OpenAiCompatOptions {
            max_event_bytes: self.reader.max_event_bytes,
            await_trailing_usage: self.openai_compat.await_trailing_usage,
        }
    }

    pub fn claude_cli_options(&self) -> ClaudeCliOptions {
        ClaudeCliOptions {
            max_line_bytes: self.reader.max_event_bytes,
            max_unique_events: self.event_log.max_unique_events,
        }
    }
}
