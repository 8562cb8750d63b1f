//! Vendor-agnostic decoding of streamed LLM output.
//!
//! Byte streams from HTTP event streams or CLI subprocesses go in; a uniform
//! sequence of [`Chunk`]s comes out, bounded by per-stream timeouts and summarized
//! by a [`StreamDiagnostics`] record.

pub mod cancel;
pub mod chunk;
pub mod config;
pub mod decoder;
pub mod decoders;
pub mod diagnostics;
pub mod error;
pub mod event_log;
pub mod frame;
pub mod policy;
pub mod registry;
pub mod router;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use cancel::{CancellationController, CancellationReason, ControllerState};
pub use chunk::{Chunk, Usage};
pub use config::Config;
pub use decoder::{DecodeStats, DecodedStream, Decoder, StreamDecoder};
pub use diagnostics::{DiagnosticsBuilder, StreamDiagnostics};
pub use error::{CoreResult, StreamError};
pub use policy::{Preset, TimeoutPolicy};
pub use registry::DecoderRegistry;
pub use session::{SessionReport, StreamOutcome, StreamSession};
pub use transport::ByteStream;
