//! Per-stream cancellation controller.
//!
//! Combines the three deadlines of a [`TimeoutPolicy`] with a caller-supplied
//! [`CancellationToken`] into one signal that is observed at every suspension point
//! (see [`CancellationController::guard`]). When the signal fires, the reason is
//! classified lazily:
//!
//! 1. first-chunk deadline passed and no chunk ever arrived: `FirstChunkTimeout`
//! 2. inter-chunk deadline passed: `InterChunkTimeout`
//! 3. total-stream deadline passed: `TotalStreamTimeout`
//! 4. otherwise: `ExternalCancellation`
//!
//! The inter-chunk deadline is armed at construction, but it only participates in the
//! combined signal once the first chunk has arrived. Before that, the first-chunk
//! deadline governs the silent period.
//!
//! A controller is owned by exactly one consumer; it is not meant to be shared
//! across tasks. Timer futures exist only while a guarded await is pending, and the
//! link to the caller's token is a child token released on drop.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreResult, StreamError};
use crate::policy::TimeoutPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    ExternalCancellation,
    FirstChunkTimeout,
    InterChunkTimeout,
    TotalStreamTimeout,
}

impl CancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalCancellation => "external_cancellation",
            Self::FirstChunkTimeout => "first_chunk_timeout",
            Self::InterChunkTimeout => "inter_chunk_timeout",
            Self::TotalStreamTimeout => "total_stream_timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed, nothing awaited yet.
    Armed,
    /// Consumption started, no chunk yet.
    FirstChunkPending,
    /// At least one chunk received.
    Streaming,
    Completed,
    TimedOut(CancellationReason),
    Cancelled,
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::TimedOut(_) | Self::Cancelled
        )
    }
}

#[derive(Debug)]
pub struct CancellationController {
    policy: TimeoutPolicy,
    started_at: Instant,
    first_chunk_deadline: Instant,
    inter_chunk_deadline: Instant,
    total_deadline: Instant,
    first_chunk_at: Option<Instant>,
    chunks_received: u64,
    external: CancellationToken,
    state: ControllerState,
}

impl CancellationController {
    /// Arms all deadlines relative to now and links to the caller's token.
    pub fn new(policy: TimeoutPolicy, external: &CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            policy,
            started_at: now,
            first_chunk_deadline: now + policy.first_chunk(),
            inter_chunk_deadline: now + policy.inter_chunk(),
            total_deadline: now + policy.total_stream(),
            first_chunk_at: None,
            chunks_received: 0,
            external: external.child_token(),
            state: ControllerState::Armed,
        }
    }

    /// Controller with no external cancellation source.
    pub fn standalone(policy: TimeoutPolicy) -> Self {
        Self::new(policy, &CancellationToken::new())
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn time_to_first_chunk(&self) -> Option<Duration> {
        self.first_chunk_at.map(|at| at - self.started_at)
    }

    pub fn chunks_received(&self) -> u64 {
        self.chunks_received
    }

    /// Must be called by the consumer after every chunk it receives.
    pub fn on_chunk_received(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let now = Instant::now();
        self.first_chunk_at.get_or_insert(now);
        self.chunks_received += 1;
        self.inter_chunk_deadline = now + self.policy.inter_chunk();
        self.state = ControllerState::Streaming;
    }

    /// Marks the stream as finished normally. No-op once terminal.
    pub fn complete(&mut self) {
        if !self.state.is_terminal() {
            self.state = ControllerState::Completed;
        }
    }

    /// Deadline that currently bounds silence on the stream.
    fn silence_deadline(&self) -> Instant {
        if self.first_chunk_at.is_none() {
            self.first_chunk_deadline
        } else {
            self.inter_chunk_deadline
        }
    }

    fn reason_at(&self, now: Instant) -> CancellationReason {
        if self.first_chunk_at.is_none() && now >= self.first_chunk_deadline {
            CancellationReason::FirstChunkTimeout
        } else if self.first_chunk_at.is_some() && now >= self.inter_chunk_deadline {
            CancellationReason::InterChunkTimeout
        } else if now >= self.total_deadline {
            CancellationReason::TotalStreamTimeout
        } else {
            CancellationReason::ExternalCancellation
        }
    }

    /// Non-blocking check of the combined signal. Classifies only if it has fired.
    pub fn check(&self) -> Option<CancellationReason> {
        let now = Instant::now();
        let fired = self.external.is_cancelled()
            || now >= self.silence_deadline()
            || now >= self.total_deadline;
        fired.then(|| self.reason_at(now))
    }

    /// Resolves once the combined signal fires, with the classified reason.
    pub async fn triggered(&self) -> CancellationReason {
        tokio::select! {
            biased;
            _ = self.external.cancelled() => {}
            _ = sleep_until(self.silence_deadline()) => {}
            _ = sleep_until(self.total_deadline) => {}
        }
        self.reason_at(Instant::now())
    }

    /// Awaits `fut` unless the combined signal fires first.
    ///
    /// On trigger the controller moves to its terminal state and `fut` is dropped.
    /// Timeouts surface as [`StreamError::Timeout`]; caller cancellation as
    /// [`StreamError::Cancelled`].
    pub async fn guard<F: Future>(&mut self, fut: F) -> CoreResult<F::Output> {
        match self.state {
            ControllerState::TimedOut(reason) => return Err(self.error_for(reason)),
            ControllerState::Cancelled => return Err(StreamError::Cancelled),
            ControllerState::Completed => return Ok(fut.await),
            ControllerState::Armed => self.state = ControllerState::FirstChunkPending,
            _ => {}
        }

        let outcome = tokio::select! {
            biased;
            reason = self.triggered() => Err(reason),
            out = fut => Ok(out),
        };
        outcome.map_err(|reason| self.trip(reason))
    }

    fn trip(&mut self, reason: CancellationReason) -> StreamError {
        self.state = match reason {
            CancellationReason::ExternalCancellation => ControllerState::Cancelled,
            other => ControllerState::TimedOut(other),
        };
        tracing::debug!(
            reason = reason.as_str(),
            chunks = self.chunks_received,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "stream signal fired"
        );
        self.error_for(reason)
    }

    fn error_for(&self, reason: CancellationReason) -> StreamError {
        let limit = match reason {
            CancellationReason::ExternalCancellation => return StreamError::Cancelled,
            CancellationReason::FirstChunkTimeout => self.policy.first_chunk(),
            CancellationReason::InterChunkTimeout => self.policy.inter_chunk(),
            CancellationReason::TotalStreamTimeout => self.policy.total_stream(),
        };
        StreamError::Timeout { reason, limit }
    }
}

impl Drop for CancellationController {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            tracing::trace!(state = ?self.state, "controller released before completion");
        }
    }
}
