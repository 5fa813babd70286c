//! # Chunked byte pipelines with watermark flow control
//!
//! This crate moves bytes from a source, through any number of transforms,
//! into a sink. Stages are joined by bounded channels that pause their
//! producer at a high watermark and resume it at a low one, so a slow sink
//! throttles the whole chain instead of letting memory grow.
//!
//! ## Core Concepts
//!
//! - **Chunk**: an immutable block of bytes with a sequence number
//! - **Source**: produces chunks until end of stream
//! - **Transform**: turns each input chunk into zero or more output chunks
//! - **Sink**: consumes chunks and is finished exactly once
//! - **Channel**: the bounded, flow-controlled queue between two stages
//! - **Pipeline**: wires the stages together and drives them to completion
//!
//! ## Example
//!
//! ```rust
//! use chunkweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sink = CollectSink::new();
//!
//!     let report = Pipeline::builder()
//!         .source(MemorySource::new(["a", "b", "c"]))
//!         .transform(uppercase())
//!         .sink(sink.clone())
//!         .build()?
//!         .run()
//!         .await?;
//!
//!     assert_eq!(report.status, PipelineStatus::Completed);
//!     assert_eq!(sink.payloads().await, vec!["A", "B", "C"]);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transforms;
pub mod util;

#[cfg(feature = "metrics")]
mod metrics;

// Re-export commonly used items
pub mod prelude {
    pub use crate::channel::{Channel, ChannelConfig, PullOutcome, PushOutcome};
    pub use crate::core::{
        Chunk, Error, ErrorKind, PipelineStatus, Result, Sequencer, Sink, SinkExt, Source,
        StageStatus, Transform,
    };
    pub use crate::io::{ByteReader, ByteSink, ByteSource, ByteWriter};
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineHandle, PipelineReport};
    pub use crate::sinks::{ByteStreamSink, CollectSink, CountSink, FileSink};
    pub use crate::sources::{from_fn, ByteStreamSource, FileSource, MemorySource};
    pub use crate::transforms::{
        gzip_compress, gzip_decompress, uppercase, CodecTransform, LineSplitTransform,
        MapTransform, Utf8Transform,
    };
    pub use crate::util::RetryPolicy;
}

// Re-export main error type
pub use crate::core::{Error, ErrorKind, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
