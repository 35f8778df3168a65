//! IQ capture session management.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::driver::{ExtIo, ExtIoDriver, HardwareInfo, LoStatus};
use crate::perf::{PerfMonitor, PerfReport};
use crate::pipeline::{MetricsSnapshot, RouterCommand, StreamState};
use crate::CaptureError;

/// Statistics about a capture session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Counters maintained by the driver callback.
    pub metrics: MetricsSnapshot,
    /// Blocks handed to the router.
    pub blocks_forwarded: u64,
    /// Payload bytes handed to the router.
    pub bytes_forwarded: u64,
}

/// Internal state shared between Session and background tasks.
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pub blocks_forwarded: AtomicU64,
    pub bytes_forwarded: AtomicU64,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            blocks_forwarded: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
        }
    }
}

/// Handle to a running IQ capture session.
///
/// The `Session` is returned by [`IqCaptureBuilder::start()`] and represents
/// an active capture. Bursts flow from the driver into sinks until `stop()`
/// is called or the `Session` is dropped.
///
/// # Lifecycle
///
/// 1. Created by [`IqCaptureBuilder::start()`]
/// 2. The driver streams into the slot ring; background tasks feed sinks
/// 3. Call [`stop()`](Session::stop) for graceful shutdown
/// 4. Dropping the `Session` also stops the hardware (but prefer explicit `stop()`)
///
/// # Example
///
/// ```ignore
/// let session = IqCapture::builder(driver)
///     .lo_frequency(7_100_000)
///     .add_sink(FileSink::wav("capture.wav"))
///     .start()
///     .await?;
///
/// tokio::time::sleep(Duration::from_secs(10)).await;
/// session.check()?;
///
/// session.stop().await?;
/// ```
///
/// [`IqCaptureBuilder::start()`]: crate::IqCaptureBuilder::start
pub struct Session {
    state: Arc<SessionState>,
    stream: Arc<StreamState>,
    extio: ExtIo<dyn ExtIoDriver>,
    hardware: HardwareInfo,
    perf: Mutex<PerfMonitor>,
    router_cmd_tx: mpsc::Sender<RouterCommand>,
    router_handle: Option<JoinHandle<()>>,
    capture_handle: Option<JoinHandle<()>>,
}

impl Session {
    /// Creates a new session with the given handles.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        state: Arc<SessionState>,
        stream: Arc<StreamState>,
        extio: ExtIo<dyn ExtIoDriver>,
        hardware: HardwareInfo,
        perf: PerfMonitor,
        router_cmd_tx: mpsc::Sender<RouterCommand>,
        router_handle: JoinHandle<()>,
        capture_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            state,
            stream,
            extio,
            hardware,
            perf: Mutex::new(perf),
            router_cmd_tx,
            router_handle: Some(router_handle),
            capture_handle: Some(capture_handle),
        }
    }

    /// Returns `true` if the session is still running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            metrics: self.stream.snapshot_metrics(),
            blocks_forwarded: self.state.blocks_forwarded.load(Ordering::SeqCst),
            bytes_forwarded: self.state.bytes_forwarded.load(Ordering::SeqCst),
        }
    }

    /// The radio reported by `InitHW`.
    pub fn hardware(&self) -> &HardwareInfo {
        &self.hardware
    }

    /// The shared stream state, for format, rate and ring inspection.
    pub fn stream(&self) -> &Arc<StreamState> {
        &self.stream
    }

    /// The driver handle, for settings and rate enumeration.
    pub fn driver(&self) -> &ExtIo<dyn ExtIoDriver> {
        &self.extio
    }

    /// Burst timing statistics gathered since the session started.
    pub fn perf_report(&self) -> PerfReport {
        let mut perf = self.perf.lock();
        perf.poll(self.stream.expected_interval());
        perf.report()
    }

    /// Retunes the local oscillator while streaming.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Driver`] if the driver exports no LO setter.
    pub fn set_lo_frequency(&self, lo_freq: i64) -> Result<LoStatus, CaptureError> {
        let status = self.extio.set_hw_lo(lo_freq)?;
        if status != LoStatus::Ok {
            tracing::warn!(lo_freq, ?status, "LO frequency out of range");
        }
        Ok(status)
    }

    /// Returns the fatal format error if the stream has halted.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::UnsupportedFormat`] once the driver has
    /// switched to a format outside the supported set.
    pub fn check(&self) -> Result<(), CaptureError> {
        match self.stream.fatal_format() {
            Some(format) => Err(CaptureError::UnsupportedFormat { format }),
            None => Ok(()),
        }
    }

    /// Gracefully stops the capture session.
    ///
    /// This will:
    /// 1. Stop storing bursts and stop the hardware
    /// 2. Drain the slot ring to sinks
    /// 3. Call `on_stop()` on all sinks
    /// 4. Close the hardware
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::UnsupportedFormat`] if the stream halted on an
    /// unsupported format; the shutdown itself has still completed.
    pub async fn stop(mut self) -> Result<(), CaptureError> {
        self.stop_internal().await
    }

    async fn stop_internal(&mut self) -> Result<(), CaptureError> {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return self.check();
        }

        let _ = self.stream.set_enabled(false);
        self.extio.stop_hw();

        // The bridge drains the ring before exiting
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.await;
        }

        let _ = self.router_cmd_tx.send(RouterCommand::Stop).await;
        if let Some(handle) = self.router_handle.take() {
            let _ = handle.await;
        }

        if let Err(e) = self.extio.close_hw() {
            tracing::warn!(error = %e, "CloseHW reported failure");
        }

        let stats = self.stats();
        tracing::info!(
            name = %self.hardware.name,
            model = %self.hardware.model,
            blocks = stats.blocks_forwarded,
            bytes = stats.bytes_forwarded,
            overruns = stats.metrics.overruns,
            timing_misses = stats.metrics.timing_misses,
            "capture stopped"
        );

        self.check()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.running.load(Ordering::SeqCst) {
            // Dropped without stop(): halt the hardware, let background tasks wind down
            self.state.running.store(false, Ordering::SeqCst);
            let _ = self.stream.set_enabled(false);
            self.extio.stop_hw();
            let _ = self.extio.close_hw();
            let _ = self.router_cmd_tx.try_send(RouterCommand::Stop);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("hardware", &self.hardware)
            .field("running", &self.is_running())
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new();
        assert!(state.running.load(Ordering::SeqCst));
        assert_eq!(state.blocks_forwarded.load(Ordering::SeqCst), 0);
        assert_eq!(state.bytes_forwarded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_session_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.blocks_forwarded, 0);
        assert_eq!(stats.metrics, MetricsSnapshot::default());
    }
}
