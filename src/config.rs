//! Configuration types for IQ capture.

use std::time::Duration;

/// Configuration for capture behavior.
///
/// Use [`CaptureConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use extio_stream::CaptureConfig;
/// use std::time::Duration;
///
/// let config = CaptureConfig {
///     slot_count: 128,
///     poll_interval: Duration::from_millis(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Number of burst slots in the ring.
    ///
    /// The ring absorbs consumer stalls of up to `slot_count` bursts. If it
    /// fills, the newest burst is dropped and a
    /// [`StreamEvent::BufferOverrun`] is emitted. Must be at least 2.
    /// Default: 64
    ///
    /// [`StreamEvent::BufferOverrun`]: crate::StreamEvent::BufferOverrun
    pub slot_count: usize,

    /// How often the capture bridge polls the ring.
    ///
    /// Default: 20ms
    pub poll_interval: Duration,

    /// Capacity of the channel between the capture bridge and the router.
    ///
    /// Default: 256
    pub block_channel_capacity: usize,

    /// Number of burst timings kept for the performance report between polls.
    ///
    /// Default: 4096
    pub timing_log_capacity: usize,

    /// Number of retry attempts for failed sink writes.
    ///
    /// Default: 3
    pub sink_retry_attempts: u32,

    /// Initial delay between sink retry attempts.
    ///
    /// Uses exponential backoff (delay doubles each attempt).
    /// Default: 100ms
    pub sink_retry_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            slot_count: 64,
            poll_interval: Duration::from_millis(20),
            block_channel_capacity: 256,
            timing_log_capacity: 4096,
            sink_retry_attempts: 3,
            sink_retry_delay: Duration::from_millis(100),
        }
    }
}
