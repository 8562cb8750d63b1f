/// Span/log field keys for stream decoding.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_DECODER: &str = "stream.decoder";
pub const KEY_VENDOR: &str = "stream.vendor";

pub const KEY_ELAPSED_MS: &str = "elapsed.ms";
pub const KEY_FIRST_CHUNK_MS: &str = "first_chunk.ms";
pub const KEY_CHUNKS: &str = "stream.chunks";
pub const KEY_BYTES: &str = "stream.bytes";
pub const KEY_TOKENS_INPUT: &str = "tokens.input";
pub const KEY_TOKENS_OUTPUT: &str = "tokens.output";

/// Failure-related (if applicable)
pub const KEY_CANCEL_REASON: &str = "cancel.reason";
pub const KEY_ERROR_KIND: &str = "error.kind";
pub const KEY_ERROR_MESSAGE: &str = "error.message";
