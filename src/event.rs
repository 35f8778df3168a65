//! Runtime events for monitoring stream health.
//!
//! Events are notifications about stream behavior. Apart from
//! [`StreamEvent::FormatMismatch`], the stream keeps running after an event
//! is emitted; they're for logging and metrics, not error handling.

use std::sync::Arc;
use std::time::Duration;

use crate::driver::HwStatus;
use crate::SampleFormat;

/// Runtime events emitted during IQ capture.
///
/// Events raised by the driver callback are delivered on the driver's own
/// thread, so the [`EventCallback`] should return quickly.
///
/// # Example
///
/// ```
/// use extio_stream::StreamEvent;
///
/// fn handle_event(event: StreamEvent) {
///     match event {
///         StreamEvent::BufferOverrun { total } => {
///             eprintln!("dropped a burst ({total} so far)");
///         }
///         StreamEvent::TimingMiss { processing, expected } => {
///             eprintln!("burst took {processing:?}, budget {expected:?}");
///         }
///         StreamEvent::SampleRateChanged { previous, current } => {
///             eprintln!("rate {previous:?} -> {current} Hz");
///         }
///         StreamEvent::FormatChanged { previous, current } => {
///             eprintln!("format {previous} -> {current}");
///         }
///         StreamEvent::FormatMismatch { format } => {
///             eprintln!("stream halted: {format} is not supported");
///         }
///         StreamEvent::HardwareStart | StreamEvent::HardwareStop => {}
///         StreamEvent::DriverNotification { status } => {
///             eprintln!("driver status {status:?}");
///         }
///         StreamEvent::SinkError { sink_name, error } => {
///             eprintln!("sink '{sink_name}' error: {error}");
///         }
///         StreamEvent::SinkDetached { sink_name, error } => {
///             eprintln!("sink '{sink_name}' removed: {error}");
///         }
///         StreamEvent::SinkBackpressure { sink_name, elapsed, budget } => {
///             eprintln!("sink '{sink_name}' took {elapsed:?} for a {budget:?} block");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The ring was full and the newest burst was dropped.
    ///
    /// Happens when the consumer falls behind the driver. Increase
    /// `slot_count` or speed up the sinks.
    BufferOverrun {
        /// Bursts dropped since the stream started.
        total: u64,
    },

    /// Storing a burst took longer than the time between bursts.
    TimingMiss {
        /// Time spent handling the burst.
        processing: Duration,
        /// Expected time between bursts.
        expected: Duration,
    },

    /// The driver announced a new sample rate and it was re-queried.
    SampleRateChanged {
        /// Rate before the change, if it was known.
        previous: Option<f64>,
        /// Rate now in effect.
        current: f64,
    },

    /// The driver switched sample format.
    FormatChanged {
        /// Format before the change.
        previous: SampleFormat,
        /// Format now in effect.
        current: SampleFormat,
    },

    /// The driver switched to a format the consumer cannot accept.
    ///
    /// Emitted once. No further data is stored and
    /// [`Session::stop`](crate::Session::stop) reports
    /// [`CaptureError::UnsupportedFormat`](crate::CaptureError::UnsupportedFormat).
    FormatMismatch {
        /// The rejected format.
        format: SampleFormat,
    },

    /// The driver asked the host to start streaming.
    HardwareStart,

    /// The driver asked the host to stop streaming.
    HardwareStop,

    /// Any other control notification from the driver.
    DriverNotification {
        /// The status as decoded from the callback.
        status: HwStatus,
    },

    /// A sink encountered an error during write.
    ///
    /// Transient errors are retried according to
    /// [`CaptureConfig`](crate::CaptureConfig) settings.
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },

    /// A sink reported a permanent error and receives no further blocks.
    ///
    /// The other sinks keep running.
    SinkDetached {
        /// Name of the detached sink.
        sink_name: String,
        /// The error that caused it.
        error: String,
    },

    /// A sink took longer to accept a block than the block lasts.
    ///
    /// Sustained backpressure lets the slot ring fill and ends in
    /// [`StreamEvent::BufferOverrun`].
    SinkBackpressure {
        /// Name of the slow sink.
        sink_name: String,
        /// Time the write took, retries included.
        elapsed: Duration,
        /// Air time of the block.
        budget: Duration,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`IqCaptureBuilder::on_event()`].
///
/// [`IqCaptureBuilder::on_event()`]: crate::IqCaptureBuilder::on_event
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use extio_stream::{event_callback, StreamEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_debug() {
        let event = StreamEvent::BufferOverrun { total: 3 };
        let debug = format!("{:?}", event);
        assert!(debug.contains("BufferOverrun"));
        assert!(debug.contains('3'));
    }

    #[test]
    fn test_stream_event_clone() {
        let event = StreamEvent::SinkError {
            sink_name: "file".to_string(),
            error: "disk full".to_string(),
        };
        assert_eq!(event.clone(), event);
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(StreamEvent::HardwareStart);
        assert!(called.load(Ordering::SeqCst));
    }
}
