//! Byte streams flowing in and out of blob stores.

use std::{
    fmt,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt, stream::BoxStream};
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::{BlobError, BlobResult};

/// Single-pass source of bytes consumed by `put`.
pub type ByteSource = BoxStream<'static, io::Result<Bytes>>;

/// Wraps an in-memory buffer as a [`ByteSource`].
pub fn source_from_bytes(data: impl Into<Bytes>) -> ByteSource {
    let data = data.into();
    futures::stream::once(async move { Ok(data) }).boxed()
}

/// Wraps any async reader (a file, a socket) as a [`ByteSource`].
pub fn source_from_reader<R>(reader: R) -> ByteSource
where
    R: AsyncRead + Send + 'static,
{
    ReaderStream::new(reader).boxed()
}

/// Lazily read body of a blob.
///
/// Dropping the stream releases the underlying connection.
pub struct BlobStream {
    inner: BoxStream<'static, BlobResult<Bytes>>,
}

impl BlobStream {
    pub fn new(inner: BoxStream<'static, BlobResult<Bytes>>) -> Self {
        Self { inner }
    }

    /// Adapts a stream of transport chunks, attaching blob context to
    /// mid-stream failures.
    pub fn from_transport<S, E>(stream: S, bucket: &str, path: &str) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<anyhow::Error>,
    {
        let bucket = bucket.to_string();
        let path = path.to_string();
        let inner = stream
            .map(move |chunk| {
                chunk.map_err(|e| {
                    BlobError::permanent(crate::Operation::Get, bucket.as_str(), path.as_str(), e)
                })
            })
            .boxed();
        Self { inner }
    }

    /// Collects the whole body in memory.
    pub async fn read_to_bytes(mut self) -> BlobResult<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }

    /// Exposes the body as an `AsyncRead`.
    pub fn into_async_read(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.inner.map_err(io::Error::other))
    }
}

impl Stream for BlobStream {
    type Item = BlobResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream").finish_non_exhaustive()
    }
}
