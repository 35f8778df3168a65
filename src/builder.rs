//! Builder pattern for `IqCapture`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::driver::{ExtIo, ExtIoDriver, HardwareInfo};
use crate::perf::timing_log;
use crate::pipeline::{CallbackDispatcher, CaptureBridge, Router, RouterCommand, StreamState};
use crate::session::{Session, SessionState};
use crate::sink::Sink;
use crate::{
    event_callback, CaptureConfig, CaptureError, DriverError, EventCallback, FormatSet,
    SampleFormat, StreamEvent,
};

/// Channel capacity for router commands.
/// Only need 1 since commands are rare (just Stop).
const COMMAND_CHANNEL_CAPACITY: usize = 1;

/// Builder for configuring and starting IQ capture.
///
/// Use [`IqCapture::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use extio_stream::{driver::MockDriver, ChannelSink, FileSink, FormatSet, IqCapture, SampleFormat};
/// use tokio::sync::mpsc;
///
/// # async fn run() -> Result<(), extio_stream::CaptureError> {
/// let (tx, mut rx) = mpsc::channel(32);
///
/// let session = IqCapture::builder(Arc::new(MockDriver::new(3)))
///     .lo_frequency(7_100_000)
///     .supported_formats(FormatSet::from([SampleFormat::I16, SampleFormat::F32]))
///     .add_sink(FileSink::wav("capture.wav"))
///     .add_sink(ChannelSink::new(tx))
///     .on_event(|e| tracing::warn!(?e, "stream event"))
///     .start()
///     .await?;
///
/// while let Some(block) = rx.recv().await {
///     // demodulate, measure, ...
/// #   break;
/// }
///
/// session.stop().await?;
/// # Ok(())
/// # }
/// ```
///
/// [`IqCapture::builder()`]: crate::IqCapture::builder
#[must_use]
pub struct IqCaptureBuilder {
    driver: Arc<dyn ExtIoDriver>,
    supported_formats: FormatSet,
    lo_frequency: Option<i64>,
    sample_rate_index: Option<i32>,
    sinks: Vec<Arc<dyn Sink>>,
    event_callback: Option<EventCallback>,
    config: CaptureConfig,
}

impl IqCaptureBuilder {
    /// Creates a new builder for `driver` with default settings.
    pub fn new(driver: Arc<dyn ExtIoDriver>) -> Self {
        Self {
            driver,
            supported_formats: FormatSet::single(SampleFormat::I16),
            lo_frequency: None,
            sample_rate_index: None,
            sinks: Vec::new(),
            event_callback: None,
            config: CaptureConfig::default(),
        }
    }

    /// Formats the consumers accept.
    ///
    /// The stream halts if the driver switches to a format outside this set.
    /// Default: `{I16}`
    pub fn supported_formats(mut self, formats: impl Into<FormatSet>) -> Self {
        self.supported_formats = formats.into();
        self
    }

    /// Local oscillator frequency in Hz passed to `StartHW`. Required.
    pub fn lo_frequency(mut self, hz: i64) -> Self {
        self.lo_frequency = Some(hz);
        self
    }

    /// Selects a sample rate by list index before starting.
    ///
    /// Default: keep the driver's current rate.
    pub fn sample_rate_index(mut self, idx: i32) -> Self {
        self.sample_rate_index = Some(idx);
        self
    }

    /// Add a sink to receive IQ blocks.
    pub fn add_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add an already shared sink.
    pub fn add_shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events raised by the driver callback run on the driver's thread.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom capture configuration.
    pub fn with_config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the builder configuration before touching the hardware.
    fn validate(&self) -> Result<i64, CaptureError> {
        if self.sinks.is_empty() {
            return Err(CaptureError::NoSinksConfigured);
        }
        if self.supported_formats.is_empty() {
            return Err(CaptureError::configuration("no supported sample formats"));
        }
        if self.config.slot_count < 2 {
            return Err(CaptureError::configuration(format!(
                "slot_count must be at least 2, got {}",
                self.config.slot_count
            )));
        }
        if self.config.block_channel_capacity == 0 {
            return Err(CaptureError::configuration(
                "block_channel_capacity must be positive",
            ));
        }
        self.lo_frequency
            .ok_or_else(|| CaptureError::configuration("LO frequency not set"))
    }

    /// Brings up the radio and starts capture.
    ///
    /// Runs `InitHW`, checks the hardware type against the supported
    /// formats, installs the callback, `OpenHW`, optionally selects the
    /// sample rate, starts the sinks, `StartHW`, sizes the slot ring from
    /// the returned pair count, and finally enables storage.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No sinks are configured, or the configuration is invalid
    /// - The hardware type does not stream a supported IQ format
    /// - `OpenHW` or `StartHW` fails
    /// - Any sink fails to start
    pub async fn start(self) -> Result<Session, CaptureError> {
        let lo_frequency = self.validate()?;
        let extio = ExtIo::new(self.driver);

        let hardware = extio.init_hw()?;
        let format = hardware
            .format()
            .filter(|f| self.supported_formats.contains(*f))
            .ok_or(CaptureError::UnsupportedHardwareType {
                hw_type: hardware.hw_type,
            })?;

        let stream = Arc::new(StreamState::new(format));
        let (recorder, perf) = timing_log(self.config.timing_log_capacity);
        let mut dispatcher = CallbackDispatcher::new(&stream)?.with_timing_log(recorder);
        if let Some(callback) = self.event_callback.clone() {
            dispatcher = dispatcher.with_event_callback(callback);
        }
        let rate_source = extio.clone();
        dispatcher = dispatcher.with_rate_query(move || rate_source.current_sample_rate().ok());
        extio.set_callback(dispatcher.into_callback());

        extio.open_hw().map_err(|_| CaptureError::OpenFailed)?;

        match Self::bring_up(
            &extio,
            &hardware,
            &stream,
            self.sample_rate_index,
            lo_frequency,
            self.supported_formats,
            &self.config,
            self.sinks,
            self.event_callback,
        )
        .await
        {
            Ok((state, router_cmd_tx, router_handle, capture_handle)) => Ok(Session::new(
                state,
                stream,
                extio,
                hardware,
                perf,
                router_cmd_tx,
                router_handle,
                capture_handle,
            )),
            Err(e) => {
                if let Err(close) = extio.close_hw() {
                    tracing::warn!(error = %close, "CloseHW failed during aborted start");
                }
                Err(e)
            }
        }
    }

    /// Everything between `OpenHW` and a running session.
    #[allow(clippy::too_many_arguments)]
    async fn bring_up(
        extio: &ExtIo<dyn ExtIoDriver>,
        hardware: &HardwareInfo,
        stream: &Arc<StreamState>,
        sample_rate_index: Option<i32>,
        lo_frequency: i64,
        supported_formats: FormatSet,
        config: &CaptureConfig,
        sinks: Vec<Arc<dyn Sink>>,
        event_callback: Option<EventCallback>,
    ) -> Result<
        (
            Arc<SessionState>,
            mpsc::Sender<RouterCommand>,
            tokio::task::JoinHandle<()>,
            tokio::task::JoinHandle<()>,
        ),
        CaptureError,
    > {
        if let Some(idx) = sample_rate_index {
            extio.set_srate(idx)?;
        }
        match extio.current_sample_rate() {
            Ok(rate) => stream.set_sample_rate(rate),
            Err(DriverError::NotSupported { entry_point }) => {
                tracing::debug!(%entry_point, "sample rate unknown, driver cannot report it");
            }
            Err(e) => return Err(e.into()),
        }

        let mut router = Router::new(sinks, config.clone());
        if let Some(callback) = event_callback {
            router = router.with_event_callback(callback);
        }
        router.start_sinks().await?;

        let pairs = match extio.start_hw(lo_frequency) {
            Ok(pairs) => pairs,
            Err(e) => {
                router.stop_sinks().await;
                return Err(match e {
                    DriverError::CallFailed { code, .. } => CaptureError::StartFailed {
                        code: i32::try_from(code).unwrap_or(i32::MIN),
                    },
                    other => CaptureError::Driver(other),
                });
            }
        };

        if let Err(e) = stream.configure(supported_formats, pairs, config.slot_count) {
            extio.stop_hw();
            router.stop_sinks().await;
            return Err(e);
        }
        let consumer = stream.take_consumer()?;

        let (block_tx, block_rx) = mpsc::channel(config.block_channel_capacity);
        let (router_cmd_tx, router_cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let state = Arc::new(SessionState::new());

        let router_handle = tokio::spawn(async move {
            router.run(block_rx, router_cmd_rx).await;
        });
        let capture_handle =
            CaptureBridge::new(consumer, block_tx, Arc::clone(&state), config.poll_interval)
                .spawn();

        stream.set_enabled(true)?;

        tracing::info!(
            name = %hardware.name,
            model = %hardware.model,
            format = %stream.format(),
            sample_rate = ?stream.sample_rate(),
            pairs,
            slots = config.slot_count,
            lo_frequency,
            "capture started"
        );

        Ok((state, router_cmd_tx, router_handle, capture_handle))
    }
}

/// Main entry point for extio-stream.
///
/// Use [`IqCapture::builder()`] to start configuring IQ capture.
pub struct IqCapture;

impl IqCapture {
    /// Creates a new builder for capturing from `driver`.
    pub fn builder(driver: Arc<dyn ExtIoDriver>) -> IqCaptureBuilder {
        IqCaptureBuilder::new(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{EntryPoint, MockDriver};
    use crate::ChannelSink;

    fn sink() -> ChannelSink {
        let (tx, _rx) = mpsc::channel(1);
        ChannelSink::new(tx)
    }

    #[tokio::test]
    async fn test_builder_rejects_no_sinks() {
        let mock = Arc::new(MockDriver::new(3));
        let result = IqCapture::builder(mock.clone()).lo_frequency(1_000).start().await;
        assert!(matches!(result, Err(CaptureError::NoSinksConfigured)));
        assert_eq!(mock.call_count(EntryPoint::InitHw), 0);
    }

    #[tokio::test]
    async fn test_builder_requires_lo_frequency() {
        let result = IqCapture::builder(Arc::new(MockDriver::new(3)))
            .add_sink(sink())
            .start()
            .await;
        assert!(matches!(result, Err(CaptureError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_builder_rejects_small_ring() {
        let result = IqCapture::builder(Arc::new(MockDriver::new(3)))
            .lo_frequency(1_000)
            .add_sink(sink())
            .with_config(CaptureConfig {
                slot_count: 1,
                ..Default::default()
            })
            .start()
            .await;
        assert!(matches!(result, Err(CaptureError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_builder_rejects_non_iq_hardware() {
        let mock = Arc::new(MockDriver::new(4));
        let result = IqCapture::builder(mock.clone())
            .lo_frequency(1_000)
            .add_sink(sink())
            .start()
            .await;
        assert!(matches!(
            result,
            Err(CaptureError::UnsupportedHardwareType { hw_type: 4 })
        ));
        assert!(!mock.has_callback());
    }

    #[tokio::test]
    async fn test_builder_rejects_unsupported_hardware_format() {
        let result = IqCapture::builder(Arc::new(MockDriver::new(7)))
            .lo_frequency(1_000)
            .add_sink(sink())
            .start()
            .await;
        assert!(matches!(
            result,
            Err(CaptureError::UnsupportedHardwareType { hw_type: 7 })
        ));
    }

    #[tokio::test]
    async fn test_open_failure() {
        let mock = Arc::new(MockDriver::new(3).failing_open());
        let result = IqCapture::builder(mock.clone())
            .lo_frequency(1_000)
            .add_sink(sink())
            .start()
            .await;
        assert!(matches!(result, Err(CaptureError::OpenFailed)));
        assert_eq!(mock.call_count(EntryPoint::StartHw64), 0);
    }

    #[tokio::test]
    async fn test_start_failure_closes_hardware() {
        let mock = Arc::new(MockDriver::new(3).with_pairs(0));
        let result = IqCapture::builder(mock.clone())
            .lo_frequency(1_000)
            .add_sink(sink())
            .start()
            .await;
        assert!(matches!(result, Err(CaptureError::StartFailed { code: 0 })));
        assert!(!mock.is_open());
    }

    #[tokio::test]
    async fn test_invalid_rate_index() {
        let mock = Arc::new(MockDriver::new(3));
        let result = IqCapture::builder(mock.clone())
            .lo_frequency(1_000)
            .sample_rate_index(9)
            .add_sink(sink())
            .start()
            .await;
        assert!(matches!(result, Err(CaptureError::Driver(DriverError::CallFailed { .. }))));
        assert!(!mock.is_running());
    }
}
