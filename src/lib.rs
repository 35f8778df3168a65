//! # extio-stream
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Lock-free IQ capture from ExtIO software-defined radios.
//!
//! An ExtIO plugin pushes fixed-size IQ bursts from its own thread through a
//! single callback. `extio-stream` copies each burst into a preallocated slot
//! ring without blocking or allocating, then drains the ring on the tokio
//! runtime and fans the bursts out to any number of sinks (WAV file,
//! channel, custom).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use extio_stream::{driver::MockDriver, ChannelSink, FileSink, IqBlock, IqCapture};
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), extio_stream::CaptureError> {
//! // User channel capacity: size based on your consumer's processing speed
//! let (tx, mut rx) = mpsc::channel::<IqBlock>(32);
//!
//! let session = IqCapture::builder(Arc::new(MockDriver::new(3)))
//!     .lo_frequency(7_100_000)
//!     .add_sink(FileSink::wav("capture.wav"))
//!     .add_sink(ChannelSink::new(tx))
//!     .on_event(|e| tracing::warn!(?e, "stream event"))
//!     .start()
//!     .await?;
//!
//! // Process blocks as they arrive
//! while let Some(block) = rx.recv().await {
//!     let pairs = block.to_f32_pairs();
//! #   let _ = pairs;
//! #   break;
//! }
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Driver Thread**: The ExtIO callback copies a burst into a slot and returns
//! - **Slot Ring**: Lock-free SPSC ring; when full the newest burst is dropped and counted
//! - **Tokio Runtime**: A polling bridge drains the ring and the router fans out to sinks
//!
//! The [`CallbackDispatcher`] and [`StreamState`] can also be used directly,
//! without the builder, when the ring is read from a dedicated thread.

// unsafe_code lint is configured in Cargo.toml as "deny"; the slot ring opts back in
#![warn(missing_docs)]
// IQ code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod block;
mod builder;
mod config;
pub mod driver;
mod error;
mod event;
pub mod format;
pub mod perf;
mod pipeline;
mod session;
mod sink;

pub use block::IqBlock;
pub use builder::{IqCapture, IqCaptureBuilder};
pub use config::CaptureConfig;
pub use error::{CaptureError, DriverError, SinkError};
pub use event::{event_callback, EventCallback, StreamEvent};
pub use format::{FormatSet, SampleFormat};
pub use perf::PerfReport;
pub use pipeline::{
    CallbackDispatcher, Dispatch, DispatcherState, MetricsSnapshot, RateQuery, SlotConsumer,
    SlotRef, StreamState,
};
pub use session::{Session, SessionStats};
pub use sink::{ChannelSink, FileSink, Overflow, Sink};
