//! Adapters from concrete transports to the byte stream decoders consume.
//!
//! Opening, authenticating and retrying connections is the caller's business;
//! these helpers only reshape an already-open source.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::Response;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Default read buffer for `AsyncRead` sources (8 KiB).
pub const DEFAULT_BUFFER_BYTES: usize = 8 * 1024;

/// Sequentially readable byte source.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// In-memory source, mostly useful for tests and replaying captures.
pub fn from_chunks<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(chunks.into_iter().map(Ok)))
}

/// Reads `reader` in pieces of at most `buffer_bytes`.
pub fn from_async_read<R>(reader: R, buffer_bytes: usize) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    let capacity = if buffer_bytes == 0 {
        DEFAULT_BUFFER_BYTES
    } else {
        buffer_bytes
    };
    Box::pin(ReaderStream::with_capacity(reader, capacity))
}

/// Standard output of a spawned subprocess.
pub fn from_child_stdout(stdout: tokio::process::ChildStdout, buffer_bytes: usize) -> ByteStream {
    from_async_read(stdout, buffer_bytes)
}

/// Body of an HTTP response.
pub fn from_response(resp: Response) -> ByteStream {
    Box::pin(
        resp.bytes_stream()
            .map(|item| item.map_err(std::io::Error::other)),
    )
}
