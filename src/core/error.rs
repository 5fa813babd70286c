//! Error types for the chunk pipeline.
//!
//! Every failure that crosses a stage boundary is an [`Error`]. Errors are
//! cheap to clone so that a failed channel can hand the same cause to every
//! stage that touches it afterwards.

use std::fmt;
use std::sync::Arc;

/// Coarse classification of an [`Error`].
///
/// The pipeline reports exactly one of these as its terminal failure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An underlying read or write failed.
    Io,
    /// A stage or channel was used against its lifecycle contract.
    ProtocolViolation,
    /// The pipeline was wired or configured incorrectly.
    Configuration,
    /// The pipeline was cancelled from outside.
    Cancelled,
    /// An unexpected failure from a stage implementation.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "io",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// The main error type for the pipeline engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A read or write against the host environment failed
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// An operation was invoked in violation of a lifecycle contract
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The pipeline or one of its channels is malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The pipeline was cancelled
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// A stage implementation failed unexpectedly
    #[error("Stage error: {0}")]
    Stage(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create an I/O error
    pub fn io(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }

    /// Create a protocol violation with a description of the misuse
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Error::ProtocolViolation(message.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Error::Configuration(message.into())
    }

    /// Wrap an arbitrary failure raised inside a stage
    pub fn unknown<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Stage(Arc::new(error))
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// The kind this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Stage(_) | Error::Custom(_) => ErrorKind::Unknown,
        }
    }

    /// Whether this error came from cancellation rather than a stage failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

// Common conversions
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(e)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            Error::Cancelled
        } else {
            Error::custom(format!("Stage task panicked: {}", e))
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;
