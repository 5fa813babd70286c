//! Byte-level boundary between the engine and the host environment.
//!
//! Files, sockets and pipes reach the engine only through [`ByteSource`] and
//! [`ByteSink`]. [`ByteReader`] and [`ByteWriter`] implement them for any tokio
//! `AsyncRead` / `AsyncWrite`.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Raw bytes read incrementally from outside the pipeline.
#[async_trait]
pub trait ByteSource: Send {
    /// Read at most `max_bytes`. `None` signals end of stream.
    async fn read_next(&mut self, max_bytes: usize) -> std::io::Result<Option<Bytes>>;
}

/// Raw bytes written incrementally to outside the pipeline.
#[async_trait]
pub trait ByteSink: Send {
    async fn write_chunk(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Flush and release the underlying resource.
    async fn close(&mut self) -> std::io::Result<()>;
}

/// Adapts any `AsyncRead` into a [`ByteSource`]
pub struct ByteReader<R> {
    inner: R,
}

impl<R> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for ByteReader<R> {
    async fn read_next(&mut self, max_bytes: usize) -> std::io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; max_bytes.max(1)];
        let n = self.inner.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

/// Adapts any `AsyncWrite` into a [`ByteSink`]
pub struct ByteWriter<W> {
    inner: W,
}

impl<W> ByteWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteSink for ByteWriter<W> {
    async fn write_chunk(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(bytes).await
    }

    async fn close(&mut self) -> std::io::Result<()> {
        self.inner.flush().await?;
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_respects_max_bytes() {
        let mut reader = ByteReader::new(&b"hello world"[..]);
        let mut parts = Vec::new();
        while let Some(part) = reader.read_next(4).await.unwrap() {
            assert!(part.len() <= 4);
            parts.push(part);
        }
        assert_eq!(parts.concat(), b"hello world");
    }

    #[tokio::test]
    async fn test_writer_collects_bytes() {
        let mut writer = ByteWriter::new(Vec::new());
        writer.write_chunk(b"abc").await.unwrap();
        writer.write_chunk(b"def").await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(writer.into_inner(), b"abcdef");
    }
}
