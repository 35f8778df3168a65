//! The driver callback entry point.
//!
//! Every callback invocation lands in [`CallbackDispatcher::dispatch`] on the
//! driver's thread. Data bursts are copied into the slot ring; control
//! notifications update the shared format and rate. Nothing here blocks, and
//! once the ring is configured nothing allocates unless an event callback
//! does.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::sync::Arc;
use std::time::Instant;

use super::metrics::Counter;
use super::ring_buffer::{PushOutcome, SlotProducer, StreamState};
use crate::driver::{DriverCallback, HwStatus};
use crate::perf::{BurstTiming, TimingRecorder};
use crate::{CaptureError, EventCallback, SampleFormat, StreamEvent};

/// Re-queries the sample rate after a rate change notification.
///
/// Returns `None` if the rate cannot be determined.
pub type RateQuery = Box<dyn FnMut() -> Option<f64> + Send>;

/// Advisory streaming state, driven by data and Start/Stop notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// No data has been stored yet.
    Idle,
    /// Data is flowing.
    Streaming,
    /// The driver requested a stop, or the stream halted.
    Stopped,
}

/// What a single callback invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The burst was copied into the ring.
    Stored {
        /// Sequence number of the stored burst.
        sequence: u64,
    },
    /// The ring was full; the burst was dropped.
    Overrun,
    /// The stream is disabled or unconfigured; the burst was ignored.
    Discarded,
    /// The stream has halted on an unsupported format.
    Halted,
    /// A control notification was applied.
    Control(HwStatus),
    /// The `count` argument matched no known event kind.
    Unrecognized(i32),
}

/// Demultiplexes driver callbacks into the slot ring.
///
/// Owns the producer side of a [`StreamState`]; there is exactly one per
/// stream.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use extio_stream::{CallbackDispatcher, Dispatch, FormatSet, SampleFormat, StreamState};
///
/// let state = Arc::new(StreamState::new(SampleFormat::I16));
/// let mut dispatcher = CallbackDispatcher::new(&state)?;
/// state.configure(FormatSet::single(SampleFormat::I16), 4, 2)?;
/// state.set_enabled(true)?;
///
/// let burst = [0u8; 16];
/// assert_eq!(dispatcher.dispatch(4, 0, 0.0, &burst), Dispatch::Stored { sequence: 0 });
/// assert_eq!(state.len(), 1);
/// # Ok::<(), extio_stream::CaptureError>(())
/// ```
pub struct CallbackDispatcher {
    producer: SlotProducer,
    state: Arc<StreamState>,
    rate_query: Option<RateQuery>,
    events: Option<EventCallback>,
    timings: Option<TimingRecorder>,
    mode: DispatcherState,
}

impl CallbackDispatcher {
    /// Creates the dispatcher for `state`, claiming its producer role.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::RoleTaken`] if a dispatcher already exists.
    pub fn new(state: &Arc<StreamState>) -> Result<Self, CaptureError> {
        Ok(Self {
            producer: state.take_producer()?,
            state: Arc::clone(state),
            rate_query: None,
            events: None,
            timings: None,
            mode: DispatcherState::Idle,
        })
    }

    /// Sets how the rate is re-read after a sample-rate notification.
    #[must_use]
    pub fn with_rate_query<F>(mut self, query: F) -> Self
    where
        F: FnMut() -> Option<f64> + Send + 'static,
    {
        self.rate_query = Some(Box::new(query));
        self
    }

    /// Sets the callback that receives stream events.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.events = Some(callback);
        self
    }

    /// Records per-burst timings into `recorder`.
    #[must_use]
    pub fn with_timing_log(mut self, recorder: TimingRecorder) -> Self {
        self.timings = Some(recorder);
        self
    }

    /// Current advisory state.
    pub fn state(&self) -> DispatcherState {
        self.mode
    }

    /// The stream this dispatcher feeds.
    pub fn stream(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// Handles one callback invocation.
    ///
    /// `data` is only read during the call.
    pub fn dispatch(&mut self, count: i32, status: i32, _iq_offset: f32, data: &[u8]) -> Dispatch {
        self.state.metrics.bump(Counter::CallbackHits);
        match count {
            c if c > 0 => self.on_data(data),
            -1 => self.on_control(HwStatus::from_code(status)),
            other => {
                self.state.metrics.bump(Counter::UnrecognizedEvents);
                tracing::trace!(count = other, status, "unrecognized callback");
                Dispatch::Unrecognized(other)
            }
        }
    }

    /// Handles one callback invocation straight from the driver ABI.
    ///
    /// # Safety
    ///
    /// For `count > 0`, `data` must be null or point to at least
    /// [`StreamState::bytes_per_burst`] readable bytes that stay valid for
    /// the duration of the call. `data` is ignored for other counts.
    pub unsafe fn dispatch_raw(
        &mut self,
        count: i32,
        status: i32,
        iq_offset: f32,
        data: *const c_void,
    ) -> Dispatch {
        if count > 0 && !data.is_null() {
            let len = self.state.bytes_per_burst();
            // SAFETY: guaranteed by the caller for data events.
            let bytes = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) };
            self.dispatch(count, status, iq_offset, bytes)
        } else {
            self.dispatch(count, status, iq_offset, &[])
        }
    }

    /// Boxes the dispatcher as a [`DriverCallback`].
    pub fn into_callback(mut self) -> DriverCallback {
        Box::new(move |count, status, iq_offset, data| {
            self.dispatch(count, status, iq_offset, data);
        })
    }

    fn on_data(&mut self, data: &[u8]) -> Dispatch {
        let started = Instant::now();
        if self.state.is_halted() {
            return Dispatch::Halted;
        }
        self.state.metrics.bump(Counter::DataEvents);
        if !self.state.is_enabled() || data.is_empty() {
            return Dispatch::Discarded;
        }

        let format = self.state.format();
        if !self.state.supported_formats().contains(format) {
            self.raise_fatal(format);
            return Dispatch::Halted;
        }

        let len = self.state.bytes_per_burst().min(data.len());
        let arrival = started.saturating_duration_since(self.state.epoch());
        let outcome = match self
            .producer
            .push(&data[..len], format, self.state.sample_rate(), arrival)
        {
            PushOutcome::Stored { sequence } => {
                self.mode = DispatcherState::Streaming;
                Dispatch::Stored { sequence }
            }
            PushOutcome::Full => {
                let total = self.state.metrics.bump(Counter::Overruns);
                if total.is_power_of_two() {
                    tracing::warn!(total, "slot ring full, dropping newest burst");
                }
                self.emit(StreamEvent::BufferOverrun { total });
                Dispatch::Overrun
            }
            PushOutcome::Unconfigured => return Dispatch::Discarded,
        };

        let processing = started.elapsed();
        if let Some(expected) = self.state.expected_interval() {
            if processing > expected {
                self.state.metrics.bump(Counter::TimingMisses);
                self.emit(StreamEvent::TimingMiss {
                    processing,
                    expected,
                });
            }
        }
        if let Some(timings) = self.timings.as_mut() {
            timings.record(BurstTiming {
                arrival,
                processing,
            });
        }
        outcome
    }

    fn on_control(&mut self, status: HwStatus) -> Dispatch {
        self.state.metrics.bump(Counter::InfoEvents);
        match status {
            HwStatus::ChangedSampleRate => self.on_rate_change(),
            HwStatus::SampleFormat(current) => {
                let previous = self.state.format();
                self.state.set_format(current);
                tracing::debug!(%previous, %current, "sample format changed");
                self.emit(StreamEvent::FormatChanged { previous, current });
                if !self.state.supported_formats().contains(current) {
                    self.raise_fatal(current);
                }
            }
            HwStatus::Start => {
                tracing::debug!("driver requested start");
                if !self.state.is_halted() {
                    self.mode = DispatcherState::Streaming;
                }
                self.emit(StreamEvent::HardwareStart);
            }
            HwStatus::Stop => {
                tracing::debug!("driver requested stop");
                self.mode = DispatcherState::Stopped;
                self.emit(StreamEvent::HardwareStop);
            }
            other => {
                tracing::debug!(status = ?other, "driver notification");
                self.emit(StreamEvent::DriverNotification { status: other });
            }
        }
        Dispatch::Control(status)
    }

    fn on_rate_change(&mut self) {
        let Some(current) = self.rate_query.as_mut().and_then(|query| query()) else {
            tracing::warn!("sample rate changed but could not be re-queried");
            return;
        };
        if !(current.is_finite() && current > 0.0) {
            tracing::warn!(current, "driver reported an invalid sample rate");
            return;
        }
        let previous = self.state.sample_rate();
        self.state.set_sample_rate(current);
        tracing::debug!(?previous, current, "sample rate changed");
        self.emit(StreamEvent::SampleRateChanged { previous, current });
    }

    fn raise_fatal(&mut self, format: SampleFormat) {
        self.mode = DispatcherState::Stopped;
        if self.state.halt(format) {
            tracing::error!(%format, supported = ?self.state.supported_formats(), "unsupported sample format, stream halted");
            self.emit(StreamEvent::FormatMismatch { format });
        }
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(callback) = &self.events {
            callback(event);
        }
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("mode", &self.mode)
            .field("stream", &self.state)
            .finish_non_exhaustive()
    }
}
