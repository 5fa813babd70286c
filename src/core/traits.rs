//! Core traits for the chunk pipeline.
//!
//! A pipeline is a [`Source`], zero or more [`Transform`]s and a [`Sink`],
//! joined by flow-controlled channels. Stages never see the channels
//! themselves: the driver only calls a stage when its output has room and its
//! input has data, so every method here is expected to return promptly.

use async_trait::async_trait;

use crate::core::chunk::Chunk;
use crate::core::error::Result;
use crate::core::status::FinishGuard;

/// A source produces chunks on demand.
///
/// `produce` is only called while the downstream channel is accepting data.
/// Sources must not read ahead without bound; any internal buffer is sized at
/// construction.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use chunkweld::core::{Chunk, Result, Sequencer, Source};
///
/// struct Countdown {
///     remaining: u32,
///     seq: Sequencer,
/// }
///
/// #[async_trait]
/// impl Source for Countdown {
///     async fn produce(&mut self) -> Result<Option<Chunk>> {
///         if self.remaining == 0 {
///             return Ok(None); // End of stream
///         }
///         self.remaining -= 1;
///         Ok(Some(self.seq.next(self.remaining.to_string())))
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send {
    /// Produce the next chunk, or `None` once the stream has ended.
    async fn produce(&mut self) -> Result<Option<Chunk>>;

    /// Name used in logs and reports
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A sink consumes chunks and reports when it is done.
///
/// `finish` is called exactly once, after the upstream channel has closed and
/// every queued chunk was consumed. Calling `consume` after `finish` must
/// fail with [`Error::ProtocolViolation`](crate::Error::ProtocolViolation);
/// [`FinishGuard`] and [`SinkExt::guarded`] implement that check.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use chunkweld::core::{Chunk, FinishGuard, Result, Sink};
///
/// #[derive(Default)]
/// struct ByteCounter {
///     total: usize,
///     guard: FinishGuard,
/// }
///
/// #[async_trait]
/// impl Sink for ByteCounter {
///     async fn consume(&mut self, chunk: Chunk) -> Result<()> {
///         self.guard.ensure_open("consume")?;
///         self.total += chunk.len();
///         Ok(())
///     }
///
///     async fn finish(&mut self) -> Result<()> {
///         self.guard.finish()
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send {
    /// Consume a single chunk.
    async fn consume(&mut self, chunk: Chunk) -> Result<()>;

    /// Called once when the upstream stream has ended and drained.
    async fn finish(&mut self) -> Result<()>;

    /// Whether the sink can take another chunk right now.
    ///
    /// An unready sink is left alone until it reports ready again.
    fn is_ready(&self) -> bool {
        true
    }

    /// Name used in logs and reports
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A transform consumes chunks from upstream and emits chunks downstream.
///
/// Each `process` call yields a finite, possibly empty batch. A transform may
/// hold partial state between calls (an unfinished multi-byte character, a
/// compressor window) but that state must be bounded, and `flush` must emit
/// all of it once upstream has ended.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use chunkweld::core::{Chunk, Result, Transform};
///
/// struct Reverse;
///
/// #[async_trait]
/// impl Transform for Reverse {
///     async fn process(&mut self, chunk: Chunk) -> Result<Vec<Chunk>> {
///         Ok(vec![chunk.map_payload(|p| p.iter().rev().copied().collect::<Vec<u8>>().into())])
///     }
/// }
/// ```
#[async_trait]
pub trait Transform: Send {
    /// Process one input chunk into zero or more output chunks.
    async fn process(&mut self, chunk: Chunk) -> Result<Vec<Chunk>>;

    /// Emit whatever is still buffered once upstream has ended.
    async fn flush(&mut self) -> Result<Vec<Chunk>> {
        Ok(vec![])
    }

    /// Name used in logs and reports
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Extension trait for sinks
pub trait SinkExt: Sink + Sized {
    /// Enforce the finish contract on a sink that does not check it itself
    fn guarded(self) -> Guarded<Self> {
        Guarded {
            sink: self,
            guard: FinishGuard::new(),
        }
    }
}

impl<S: Sink> SinkExt for S {}

/// A sink wrapper that rejects use after `finish`.
pub struct Guarded<S> {
    sink: S,
    guard: FinishGuard,
}

impl<S> Guarded<S> {
    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[async_trait]
impl<S: Sink> Sink for Guarded<S> {
    async fn consume(&mut self, chunk: Chunk) -> Result<()> {
        self.guard.ensure_open("consume")?;
        self.sink.consume(chunk).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.guard.finish()?;
        self.sink.finish().await
    }

    fn is_ready(&self) -> bool {
        !self.guard.is_finished() && self.sink.is_ready()
    }

    fn name(&self) -> &'static str {
        self.sink.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[derive(Default)]
    struct Unchecked {
        consumed: usize,
        finished: usize,
    }

    #[async_trait]
    impl Sink for Unchecked {
        async fn consume(&mut self, _chunk: Chunk) -> Result<()> {
            self.consumed += 1;
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            self.finished += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_guarded_rejects_after_finish() {
        let mut sink = Unchecked::default().guarded();
        sink.consume(Chunk::new("a", 0)).await.unwrap();
        sink.finish().await.unwrap();
        assert!(!sink.is_ready());

        let err = sink.consume(Chunk::new("b", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        let err = sink.finish().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        let inner = sink.into_inner();
        assert_eq!((inner.consumed, inner.finished), (1, 1));
    }

    #[test]
    fn test_default_name_is_type_name() {
        assert!(Unchecked::default().name().ends_with("Unchecked"));
    }
}
