//! Sink implementations for the chunkweld library.
//!
//! Every sink here carries a [`FinishGuard`], so writing after `finish` is a
//! reported protocol violation rather than undefined behaviour.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::BufWriter;
use tokio::sync::Mutex as TokioMutex;

use crate::core::{Chunk, Error, FinishGuard, Result, Sink};
use crate::io::{ByteSink, ByteWriter};

/// A sink that collects chunks in memory.
///
/// Clones share the same storage, so a test can keep one handle while the
/// pipeline owns the other.
pub struct CollectSink {
    chunks: Arc<TokioMutex<Vec<Chunk>>>,
    finished: Arc<AtomicUsize>,
    guard: FinishGuard,
}

impl CollectSink {
    /// Create a new collect sink
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(TokioMutex::new(Vec::new())),
            finished: Arc::new(AtomicUsize::new(0)),
            guard: FinishGuard::new(),
        }
    }

    /// Get a copy of the collected chunks
    pub async fn chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().await.clone()
    }

    /// Get the payloads of the collected chunks
    pub async fn payloads(&self) -> Vec<Bytes> {
        self.chunks
            .lock()
            .await
            .iter()
            .map(|c| c.payload().clone())
            .collect()
    }

    /// All collected payloads joined into one buffer
    pub async fn concat(&self) -> Vec<u8> {
        self.chunks
            .lock()
            .await
            .iter()
            .flat_map(|c| c.payload().iter().copied())
            .collect()
    }

    /// How many times `finish` has succeeded on any clone
    pub fn finish_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for CollectSink {
    async fn consume(&mut self, chunk: Chunk) -> Result<()> {
        self.guard.ensure_open("consume")?;
        self.chunks.lock().await.push(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.guard.finish()?;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for CollectSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CollectSink {
    fn clone(&self) -> Self {
        Self {
            chunks: self.chunks.clone(),
            finished: self.finished.clone(),
            guard: self.guard.clone(),
        }
    }
}

/// A sink that counts chunks and bytes
#[derive(Clone, Default)]
pub struct CountSink {
    chunks: Arc<AtomicUsize>,
    bytes: Arc<AtomicUsize>,
    guard: FinishGuard,
}

impl CountSink {
    /// Create a new count sink
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> usize {
        self.chunks.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for CountSink {
    async fn consume(&mut self, chunk: Chunk) -> Result<()> {
        self.guard.ensure_open("consume")?;
        self.chunks.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(chunk.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.guard.finish()
    }
}

/// A sink that writes every payload to a [`ByteSink`] and closes it on finish
pub struct ByteStreamSink<B> {
    inner: B,
    guard: FinishGuard,
}

impl<B: ByteSink> ByteStreamSink<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            guard: FinishGuard::new(),
        }
    }

    pub fn get_ref(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

#[async_trait]
impl<B: ByteSink> Sink for ByteStreamSink<B> {
    async fn consume(&mut self, chunk: Chunk) -> Result<()> {
        self.guard.ensure_open("consume")?;
        self.inner
            .write_chunk(chunk.payload())
            .await
            .map_err(Error::io)
    }

    async fn finish(&mut self) -> Result<()> {
        self.guard.finish()?;
        self.inner.close().await.map_err(Error::io)
    }
}

/// A sink that writes to a file on disk
pub type FileSink = ByteStreamSink<ByteWriter<BufWriter<tokio::fs::File>>>;

impl FileSink {
    /// Create (or truncate) a file
    pub async fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(ByteStreamSink::new(ByteWriter::new(BufWriter::new(file))))
    }

    /// Create a file sink that appends to an existing file
    pub async fn append<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(ByteStreamSink::new(ByteWriter::new(BufWriter::new(file))))
    }
}
