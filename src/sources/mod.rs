//! Source implementations for the chunkweld library.
//!
//! This module provides concrete sources that feed chunks into pipelines:
//! in-memory payloads, async closures, and anything that implements
//! [`ByteSource`], including files.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

use crate::core::{Chunk, Error, Result, Sequencer, Source};
use crate::io::{ByteReader, ByteSource};
use crate::util::RetryPolicy;

/// Default read size for byte-stream sources (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A source that yields a fixed list of payloads.
///
/// The final payload is emitted as the stream's last chunk.
pub struct MemorySource {
    items: VecDeque<Bytes>,
    seq: Sequencer,
}

impl MemorySource {
    /// Create a new memory source
    pub fn new<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            seq: Sequencer::new(),
        }
    }

    /// Get the number of remaining payloads
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        let Some(payload) = self.items.pop_front() else {
            return Ok(None);
        };
        if self.items.is_empty() {
            Ok(Some(self.seq.last(payload)))
        } else {
            Ok(Some(self.seq.next(payload)))
        }
    }
}

/// Helper function to create a source from an async closure.
///
/// The closure returns the next payload, or `None` at end of stream.
pub fn from_fn<F, Fut>(f: F) -> FnSource<F, Fut>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<Bytes>>> + Send,
{
    FnSource {
        f,
        seq: Sequencer::new(),
        _phantom: PhantomData,
    }
}

/// A source created from a function
pub struct FnSource<F, Fut> {
    f: F,
    seq: Sequencer,
    _phantom: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Source for FnSource<F, Fut>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<Bytes>>> + Send,
{
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        let next = (self.f)().await?;
        Ok(next.map(|payload| self.seq.next(payload)))
    }
}

/// A source that reads bounded chunks from a [`ByteSource`].
pub struct ByteStreamSource<B> {
    inner: B,
    chunk_size: usize,
    retry: Option<RetryPolicy>,
    seq: Sequencer,
}

impl<B: ByteSource> ByteStreamSource<B> {
    /// Create a source reading up to [`DEFAULT_CHUNK_SIZE`] bytes per chunk
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: None,
            seq: Sequencer::new(),
        }
    }

    /// Set the maximum payload size of each chunk
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Retry failed reads with backoff before failing the pipeline
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    async fn read_with_retry(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut failures = 0;
        loop {
            match self.inner.read_next(self.chunk_size).await {
                Ok(read) => return Ok(read),
                Err(e) => {
                    failures += 1;
                    let delay = self.retry.as_ref().and_then(|p| p.next_delay(failures));
                    match delay {
                        Some(delay) => {
                            debug!(error = %e, attempt = failures, "retrying read");
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<B: ByteSource> Source for ByteStreamSource<B> {
    async fn produce(&mut self) -> Result<Option<Chunk>> {
        let read = self.read_with_retry().await.map_err(Error::io)?;
        Ok(read.map(|payload| self.seq.next(payload)))
    }
}

/// A source that streams a file from disk
pub type FileSource = ByteStreamSource<ByteReader<tokio::fs::File>>;

impl FileSource {
    /// Open a file for streaming
    pub async fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(ByteStreamSource::new(ByteReader::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use std::time::Duration;

    async fn drain<S: Source>(source: &mut S) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = source.produce().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_memory_source_marks_last() {
        let mut source = MemorySource::new(["a", "b", "c"]);
        let chunks = drain(&mut source).await;

        let flags: Vec<_> = chunks.iter().map(|c| (c.sequence(), c.is_last())).collect();
        assert_eq!(flags, vec![(0, false), (1, false), (2, true)]);
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_from_fn_source() {
        let mut remaining = 3u8;
        let mut source = from_fn(move || {
            let next = if remaining == 0 {
                None
            } else {
                remaining -= 1;
                Some(Bytes::from(vec![remaining]))
            };
            async move { Ok::<_, Error>(next) }
        });

        let payloads: Vec<_> = drain(&mut source)
            .await
            .into_iter()
            .map(Chunk::into_payload)
            .collect();
        assert_eq!(payloads, vec![vec![2u8], vec![1u8], vec![0u8]]);
    }

    #[tokio::test]
    async fn test_byte_stream_source_chunks_bounded() {
        let data = b"0123456789".to_vec();
        let mut source = ByteStreamSource::new(ByteReader::new(&data[..])).chunk_size(4);
        let chunks = drain(&mut source).await;

        assert!(chunks.iter().all(|c| c.len() <= 4));
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload().to_vec()).collect();
        assert_eq!(joined, data);
    }

    struct Flaky {
        failures_left: usize,
        served: bool,
    }

    #[async_trait]
    impl ByteSource for Flaky {
        async fn read_next(&mut self, _max: usize) -> std::io::Result<Option<Bytes>> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "transient",
                ));
            }
            if self.served {
                Ok(None)
            } else {
                self.served = true;
                Ok(Some(Bytes::from_static(b"ok")))
            }
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_reads() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1));
        let mut source = ByteStreamSource::new(Flaky {
            failures_left: 2,
            served: false,
        })
        .retry(policy);

        let chunk = source.produce().await.unwrap().unwrap();
        assert_eq!(chunk.payload(), &Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn test_read_error_without_retry_is_io() {
        let mut source = ByteStreamSource::new(Flaky {
            failures_left: 1,
            served: false,
        });
        let err = source.produce().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        tokio::fs::write(&path, b"file contents").await.unwrap();

        let mut source = FileSource::open(&path).await.unwrap().chunk_size(5);
        let joined: Vec<u8> = drain(&mut source)
            .await
            .iter()
            .flat_map(|c| c.payload().to_vec())
            .collect();
        assert_eq!(joined, b"file contents");
    }
}
