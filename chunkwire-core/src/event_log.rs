//! Rate-limited logging for unrecognized vendor event types.
//!
//! New server-side event types must never break a decode, but logging every
//! occurrence would flood the logs. The first `max_unique_events` distinct type
//! names are logged as they appear; every later occurrence (repeat or new type)
//! is only counted, and a single summary line can be emitted at stream end.

use std::collections::BTreeMap;

use serde::Serialize;

pub const DEFAULT_MAX_UNIQUE_EVENTS: usize = 3;

/// End-of-stream report of what was suppressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuppressionSummary {
    pub total_suppressed: u64,
    /// Suppressed occurrences per event type name.
    pub by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimitedEventLog {
    source: String,
    max_unique: usize,
    announced: Vec<String>,
    suppressed: BTreeMap<String, u64>,
    total_suppressed: u64,
    summary_emitted: bool,
}

impl RateLimitedEventLog {
    /// `source` names the decoder that owns this log, for log context.
    pub fn new(source: impl Into<String>, max_unique: usize) -> Self {
        Self {
            source: source.into(),
            max_unique,
            announced: Vec::new(),
            suppressed: BTreeMap::new(),
            total_suppressed: 0,
            summary_emitted: false,
        }
    }

    /// Records one occurrence of an unknown event type.
    /// Returns `true` if a log line was emitted for it.
    pub fn record(&mut self, event_type: &str) -> bool {
        let first_sighting = !self.announced.iter().any(|t| t == event_type);
        if first_sighting && self.announced.len() < self.max_unique {
            self.announced.push(event_type.to_string());
            tracing::info!(
                source = %self.source,
                event_type,
                "ignoring unrecognized stream event type"
            );
            return true;
        }
        *self.suppressed.entry(event_type.to_string()).or_insert(0) += 1;
        self.total_suppressed += 1;
        false
    }

    /// Event types that got their own log line.
    pub fn announced(&self) -> &[String] {
        &self.announced
    }

    pub fn total_suppressed(&self) -> u64 {
        self.total_suppressed
    }

    pub fn summary(&self) -> Option<SuppressionSummary> {
        if self.total_suppressed == 0 {
            return None;
        }
        Some(SuppressionSummary {
            total_suppressed: self.total_suppressed,
            by_type: self.suppressed.clone(),
        })
    }

    /// Emits the summary line once; later calls (or an empty log) emit nothing.
    pub fn log_summary(&mut self) -> Option<SuppressionSummary> {
        if self.summary_emitted {
            return None;
        }
        let summary = self.summary()?;
        self.summary_emitted = true;
        let types = summary
            .by_type
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(
            source = %self.source,
            suppressed = summary.total_suppressed,
            types = %types,
            "suppressed unrecognized stream events"
        );
        Some(summary)
    }
}

impl Default for RateLimitedEventLog {
    fn default() -> Self {
        Self::new("stream", DEFAULT_MAX_UNIQUE_EVENTS)
    }
}
