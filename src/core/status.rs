//! Lifecycle states for stages and whole pipelines.

use std::fmt;

use crate::core::error::{Error, Result};

/// Where a single stage is in its lifecycle.
///
/// `Idle → Running ⇄ Paused → Draining → Completed`, with `Failed` reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageStatus {
    Idle,
    Running,
    /// Output is backpressured, input is empty, or the stage is not ready
    Paused,
    /// Upstream has ended but buffered output is still being delivered
    Draining,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a pipeline is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStatus {
    Building,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }

    /// The terminal status a run ends in for the given outcome
    pub fn from_outcome<T>(outcome: &Result<T>) -> Self {
        match outcome {
            Ok(_) => PipelineStatus::Completed,
            Err(e) if e.is_cancelled() => PipelineStatus::Cancelled,
            Err(_) => PipelineStatus::Failed,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks whether a sink has been finished.
///
/// Sinks embed one of these and check it on every call so that
/// "write after end" surfaces as a [`Error::ProtocolViolation`] instead of
/// touching a closed resource.
#[derive(Debug, Default, Clone)]
pub struct FinishGuard {
    finished: bool,
}

impl FinishGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fail if the sink has already been finished
    pub fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.finished {
            return Err(Error::protocol(format!("{} after finish", operation)));
        }
        Ok(())
    }

    /// Mark the sink finished; a second call is a protocol violation
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open("finish")?;
        self.finished = true;
        Ok(())
    }
}
