use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancellationReason;

/// Core error type for chunkwire.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The frame reader's size guard tripped. Only reconfiguring the limit helps.
    #[error("event exceeds maximum size of {max_bytes} bytes (approx {approx_bytes} bytes buffered)")]
    FrameTooLarge { max_bytes: usize, approx_bytes: usize },

    #[error("{}", timeout_message(*reason, *limit))]
    Timeout {
        reason: CancellationReason,
        limit: Duration,
    },

    /// In-band error reported by the upstream vendor.
    #[error("vendor {vendor} reported an error: {message}")]
    Vendor { vendor: String, message: String },

    /// Caller-initiated cancellation. Not a decoder failure.
    #[error("stream cancelled by caller")]
    Cancelled,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    /// Stable short name, used for diagnostics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::Timeout { .. } => "timeout",
            Self::Vendor { .. } => "vendor_error",
            Self::Cancelled => "cancelled",
            Self::Validation(_) => "validation",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }

    /// The classified reason for timeouts and caller cancellation.
    pub fn cancellation_reason(&self) -> Option<CancellationReason> {
        match self {
            Self::Timeout { reason, .. } => Some(*reason),
            Self::Cancelled => Some(CancellationReason::ExternalCancellation),
            _ => None,
        }
    }
}

fn timeout_message(reason: CancellationReason, limit: Duration) -> String {
    let secs = limit.as_secs_f64();
    match reason {
        CancellationReason::FirstChunkTimeout => {
            format!("no data received from the stream within {secs:.1}s")
        }
        CancellationReason::InterChunkTimeout => {
            format!("stream stalled: no data for {secs:.1}s after the last chunk")
        }
        CancellationReason::TotalStreamTimeout => {
            format!("stream exceeded its total time budget of {secs:.1}s")
        }
        CancellationReason::ExternalCancellation => "stream cancelled by caller".to_string(),
    }
}

pub type CoreResult<T> = std::result::Result<T, StreamError>;
