//! Streaming compression as a transform.
//!
//! A [`Codec`] is a push-style byte encoder or decoder. [`CodecTransform`]
//! adapts any codec to the [`Transform`] contract: input chunks are fed as they
//! arrive, the codec's trailer is emitted on `flush`, and output is re-chunked
//! so no payload exceeds a fixed size.

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::{self, Write};

use crate::core::{Chunk, Error, FinishGuard, Result, Sequencer, Transform};

/// Maximum payload size emitted by a [`CodecTransform`] (64 KiB)
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024;

/// An incremental byte codec.
///
/// Implementations append whatever output is available to `output`; they may
/// hold input back until more arrives or until `finish`.
pub trait Codec: Send {
    fn process(&mut self, input: &[u8], output: &mut Vec<u8>) -> io::Result<()>;

    /// Emit everything still held, including any stream trailer.
    fn finish(&mut self, output: &mut Vec<u8>) -> io::Result<()>;
}

/// Gzip compression
pub struct GzipEncoder {
    inner: GzEncoder<Vec<u8>>,
}

impl GzipEncoder {
    pub fn new(level: Compression) -> Self {
        Self {
            inner: GzEncoder::new(Vec::new(), level),
        }
    }
}

impl Default for GzipEncoder {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl Codec for GzipEncoder {
    fn process(&mut self, input: &[u8], output: &mut Vec<u8>) -> io::Result<()> {
        self.inner.write_all(input)?;
        output.append(self.inner.get_mut());
        Ok(())
    }

    fn finish(&mut self, output: &mut Vec<u8>) -> io::Result<()> {
        self.inner.try_finish()?;
        output.append(self.inner.get_mut());
        Ok(())
    }
}

/// Gzip decompression
pub struct GzipDecoder {
    inner: GzDecoder<Vec<u8>>,
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self {
            inner: GzDecoder::new(Vec::new()),
        }
    }
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for GzipDecoder {
    fn process(&mut self, input: &[u8], output: &mut Vec<u8>) -> io::Result<()> {
        self.inner.write_all(input)?;
        output.append(self.inner.get_mut());
        Ok(())
    }

    fn finish(&mut self, output: &mut Vec<u8>) -> io::Result<()> {
        self.inner.try_finish()?;
        output.append(self.inner.get_mut());
        Ok(())
    }
}

/// Runs a [`Codec`] over the stream.
///
/// Codec failures surface as [`Error::Io`]. The chunk produced by `flush`
/// closes the stream.
pub struct CodecTransform<C> {
    codec: C,
    buffer: Vec<u8>,
    max_chunk_size: usize,
    seq: Sequencer,
    guard: FinishGuard,
}

impl<C: Codec> CodecTransform<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            buffer: Vec::new(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            seq: Sequencer::new(),
            guard: FinishGuard::new(),
        }
    }

    /// Set the largest payload this transform emits
    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size.max(1);
        self
    }

    fn emit(&mut self, last: bool) -> Vec<Chunk> {
        let data = Bytes::from(std::mem::take(&mut self.buffer));
        let mut chunks = Vec::with_capacity(data.len().div_ceil(self.max_chunk_size));
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.max_chunk_size).min(data.len());
            let piece = data.slice(offset..end);
            if last && end == data.len() {
                chunks.push(self.seq.last(piece));
            } else {
                chunks.push(self.seq.next(piece));
            }
            offset = end;
        }
        chunks
    }
}

#[async_trait]
impl<C: Codec> Transform for CodecTransform<C> {
    async fn process(&mut self, chunk: Chunk) -> Result<Vec<Chunk>> {
        self.guard.ensure_open("process")?;
        self.codec
            .process(chunk.payload(), &mut self.buffer)
            .map_err(Error::io)?;
        Ok(self.emit(false))
    }

    async fn flush(&mut self) -> Result<Vec<Chunk>> {
        self.guard.finish()?;
        self.codec.finish(&mut self.buffer).map_err(Error::io)?;
        Ok(self.emit(true))
    }
}

/// A transform that gzip-compresses the stream
pub fn gzip_compress() -> CodecTransform<GzipEncoder> {
    CodecTransform::new(GzipEncoder::default())
}

/// A transform that decompresses a gzip stream
pub fn gzip_decompress() -> CodecTransform<GzipDecoder> {
    CodecTransform::new(GzipDecoder::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    async fn feed<C: Codec>(transform: &mut CodecTransform<C>, input: Vec<Chunk>) -> Vec<Chunk> {
        let mut out = Vec::new();
        for chunk in input {
            out.extend(transform.process(chunk).await.unwrap());
        }
        out.extend(transform.flush().await.unwrap());
        out
    }

    fn split(data: &[u8], size: usize) -> Vec<Chunk> {
        let mut seq = Sequencer::new();
        data.chunks(size).map(|part| seq.next(part.to_vec())).collect()
    }

    fn concat(chunks: &[Chunk]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.payload().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_gzip_round_trip() {
        let original: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

        let compressed = feed(&mut gzip_compress(), split(&original, 1000)).await;
        assert!(compressed.last().unwrap().is_last());

        let restored = feed(&mut gzip_decompress(), split(&concat(&compressed), 77)).await;
        assert_eq!(concat(&restored), original);
    }

    #[tokio::test]
    async fn test_gzip_round_trip_empty() {
        let compressed = feed(&mut gzip_compress(), vec![]).await;
        assert!(!compressed.is_empty());

        let restored = feed(&mut gzip_decompress(), split(&concat(&compressed), 3)).await;
        assert!(concat(&restored).is_empty());
    }

    #[tokio::test]
    async fn test_output_is_rechunked() {
        let original = vec![7u8; 10_000];
        let compressed = feed(&mut gzip_compress(), vec![Chunk::new(original.clone(), 0)]).await;
        let mut decoder = gzip_decompress().max_chunk_size(512);
        let restored = feed(&mut decoder, vec![Chunk::new(concat(&compressed), 0)]).await;

        assert!(restored.iter().all(|c| c.len() <= 512));
        assert!(restored.windows(2).all(|w| w[0].sequence() < w[1].sequence()));
        assert_eq!(concat(&restored), original);
    }

    #[tokio::test]
    async fn test_garbage_input_is_io_error() {
        let mut decoder = gzip_decompress();
        let err = decoder
            .process(Chunk::new("definitely not gzip", 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_process_after_flush_is_violation() {
        let mut encoder = gzip_compress();
        encoder.flush().await.unwrap();
        let err = encoder.process(Chunk::new("late", 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }
}
