//! Error types for extio-stream.
//!
//! Errors are split into three categories:
//! - **Fatal errors** ([`CaptureError`]): prevent a capture from starting, or
//!   halt data acceptance mid-stream
//! - **Driver errors** ([`DriverError`]): a single call-through failed or the
//!   driver does not export the entry point
//! - **Recoverable events**: overruns, timing misses and sink retries are
//!   surfaced via [`EventCallback`](crate::EventCallback) and counted

use std::path::PathBuf;

use crate::driver::EntryPoint;
use crate::SampleFormat;

/// Fatal errors raised during session setup or surfaced by a halted stream.
///
/// Runtime issues that the stream survives (overruns, timing misses, slow
/// sinks) are never returned as errors; they are reported through the event
/// callback instead.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Buffer sizing or lifecycle misuse detected before streaming.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// The radio reported a hardware type this crate cannot stream.
    #[error("unsupported hardware type: {hw_type}")]
    UnsupportedHardwareType {
        /// Raw ExtIO hardware type id.
        hw_type: i32,
    },

    /// The stream format is outside the session's supported set.
    ///
    /// Raised at configure time, or latched when the driver switches to an
    /// unsupported format mid-stream. Data acceptance stops in the latter case.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The offending format.
        format: SampleFormat,
    },

    /// `reset()` was called while streaming was enabled.
    #[error("stream state cannot be reset while streaming is enabled")]
    ResetWhileStreaming,

    /// A producer or consumer was already attached to the stream state.
    #[error("the {role} role is already taken for this stream")]
    RoleTaken {
        /// "producer" or "consumer".
        role: &'static str,
    },

    /// `OpenHW` reported failure.
    #[error("failed to open radio hardware")]
    OpenFailed,

    /// `StartHW` returned a non-positive pair count.
    #[error("failed to start radio hardware (returned {code})")]
    StartFailed {
        /// Raw value returned by the driver.
        code: i32,
    },

    /// No sinks were configured before starting.
    #[error("no sinks configured - add at least one sink")]
    NoSinksConfigured,

    /// A sink failed during initialization.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink that failed.
        sink_name: String,
        /// Why the sink failed to start.
        reason: String,
    },

    /// A driver call-through failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl CaptureError {
    /// Creates a configuration error with the given reason.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// Errors returned by the driver call-through layer.
///
/// Absence of an optional entry point is reported as [`NotSupported`] and is
/// never confused with a call that was made and failed.
///
/// [`NotSupported`]: DriverError::NotSupported
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The driver does not export this entry point.
    #[error("{entry_point} is not supported by this driver")]
    NotSupported {
        /// The missing entry point.
        entry_point: EntryPoint,
    },

    /// The entry point exists but reported failure.
    #[error("{entry_point} failed with code {code}")]
    CallFailed {
        /// The entry point that failed.
        entry_point: EntryPoint,
        /// Raw return value.
        code: i64,
    },
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
///
/// Sink errors never stop the capture. The router emits a
/// [`StreamEvent::SinkError`](crate::StreamEvent::SinkError) for each one,
/// retries [transient](SinkError::is_transient) errors, and detaches a sink
/// that reports a permanent one.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// A block arrived in a format the sink cannot take after it was opened.
    #[error("stream format changed from {previous} to {current}")]
    FormatChanged {
        /// Format the sink was opened with.
        previous: SampleFormat,
        /// Format of the rejected block.
        current: SampleFormat,
    },

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the same write may succeed.
    ///
    /// A closed channel stays closed and a sink that rejects a format keeps
    /// rejecting it; both are permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::WriteFailed { .. } | Self::FileError { .. } | Self::Custom(_) => true,
            Self::ChannelClosed | Self::FormatChanged { .. } => false,
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}
