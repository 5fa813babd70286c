//! Core traits and types for the chunkweld library.
//!
//! This module contains the chunk type, the error model, lifecycle states and
//! the stage traits that every pipeline is assembled from.

pub mod chunk;
pub mod error;
pub mod status;
pub mod traits;

// Re-export core items
pub use chunk::{Chunk, Sequencer};
pub use error::{Error, ErrorKind, Result};
pub use status::{FinishGuard, PipelineStatus, StageStatus};
pub use traits::{Guarded, Sink, SinkExt, Source, Transform};
