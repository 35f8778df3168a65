//! Destinations for captured IQ blocks.
//!
//! The router hands every block to each attached [`Sink`]. Built in:
//!
//! - [`ChannelSink`]: forwards blocks to a tokio mpsc channel, waiting or
//!   dropping when the receiver lags
//! - [`FileSink`]: two-channel IQ WAV, starting a new segment file whenever
//!   the driver switches sample format or rate

mod channel;
mod file;

pub use channel::{ChannelSink, Overflow};
pub use file::FileSink;

use crate::{IqBlock, SampleFormat, SinkError};
use async_trait::async_trait;

/// A consumer of IQ blocks.
///
/// Methods take `&self`; keep mutable state behind a lock. All of them run on
/// the tokio runtime, so blocking I/O belongs in `spawn_blocking`.
///
/// # Errors and the router
///
/// What the router does with a failed [`write`](Sink::write) depends on
/// [`SinkError::is_transient`]. Transient errors are retried with backoff
/// per [`CaptureConfig`]. Any other error detaches the sink: it receives no
/// further blocks but is still stopped at shutdown. A sink that can recover
/// from a format or rate change on its own (as [`FileSink`] does by rolling
/// over) should do so instead of returning an error.
///
/// A write that takes longer than [`IqBlock::duration`] is reported as
/// backpressure. Sustained backpressure ends in slot ring overruns.
///
/// [`CaptureConfig`]: crate::CaptureConfig
///
/// # Example
///
/// ```
/// use extio_stream::{IqBlock, SampleFormat, Sink, SinkError};
/// use async_trait::async_trait;
///
/// struct PowerMeter;
///
/// #[async_trait]
/// impl Sink for PowerMeter {
///     fn name(&self) -> &str {
///         "power"
///     }
///
///     fn accepts(&self, format: SampleFormat) -> bool {
///         format != SampleFormat::U8
///     }
///
///     async fn write(&self, block: &IqBlock) -> Result<(), SinkError> {
///         let pairs = block.to_f32_pairs();
///         let power: f32 = pairs.iter().map(|(i, q)| i * i + q * q).sum();
///         println!("burst {}: {:.3}", block.sequence, power / pairs.len().max(1) as f32);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in events and log fields.
    fn name(&self) -> &str;

    /// Whether this sink wants blocks in `format`.
    ///
    /// Declined blocks are skipped silently. Defaults to every format.
    fn accepts(&self, format: SampleFormat) -> bool {
        let _ = format;
        true
    }

    /// Called once before `StartHW`. An error aborts the capture.
    async fn on_start(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Consumes one burst.
    async fn write(&self, block: &IqBlock) -> Result<(), SinkError>;

    /// Called once at shutdown, after the last block.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Bare;

    #[async_trait]
    impl Sink for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        async fn write(&self, _block: &IqBlock) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<dyn Sink>>();
    }

    #[test]
    fn test_default_accepts_every_format() {
        let all = [
            SampleFormat::U8,
            SampleFormat::I8,
            SampleFormat::I16,
            SampleFormat::I24,
            SampleFormat::I32,
            SampleFormat::F32,
        ];
        assert!(all.into_iter().all(|f| Bare.accepts(f)));
    }
}
