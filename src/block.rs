//! IQ data block with metadata.

use std::sync::Arc;
use std::time::Duration;

use crate::format::iq_to_f32;
use crate::SampleFormat;

/// One driver burst of raw IQ bytes, as it left the ring.
///
/// `IqBlock` is the unit passed from the ring consumer to sinks. The payload
/// keeps the driver's own encoding; [`to_f32_pairs`](Self::to_f32_pairs)
/// decodes it on demand.
///
/// Bytes are stored in an `Arc<Vec<u8>>` so fanning a block out to several
/// sinks never copies the payload.
///
/// # Example
///
/// ```
/// use extio_stream::{IqBlock, SampleFormat};
/// use std::time::Duration;
///
/// let block = IqBlock::new(vec![0u8; 4 * 4800], SampleFormat::I16, Some(48_000.0), 0, Duration::ZERO);
/// assert_eq!(block.pair_count(), 4800);
/// assert_eq!(block.duration(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct IqBlock {
    /// Raw interleaved I/Q samples in `format`, little-endian.
    pub data: Arc<Vec<u8>>,

    /// Encoding of `data`.
    pub format: SampleFormat,

    /// Sample rate in effect when the burst arrived, if known.
    pub sample_rate: Option<f64>,

    /// Position of this burst among the bursts stored in the ring.
    ///
    /// Bursts dropped on overrun do not consume a sequence number.
    pub sequence: u64,

    /// Arrival time relative to the start of the stream.
    pub timestamp: Duration,
}

impl IqBlock {
    /// Creates a block from an owned payload.
    pub fn new(
        data: Vec<u8>,
        format: SampleFormat,
        sample_rate: Option<f64>,
        sequence: u64,
        timestamp: Duration,
    ) -> Self {
        Self {
            data: Arc::new(data),
            format,
            sample_rate,
            sequence,
            timestamp,
        }
    }

    /// Number of complete IQ pairs in the payload.
    pub fn pair_count(&self) -> usize {
        self.data.len() / self.format.bytes_per_pair()
    }

    /// Playback duration of the block, or zero when the rate is unknown.
    pub fn duration(&self) -> Duration {
        match self.sample_rate {
            Some(rate) if rate > 0.0 => {
                Duration::try_from_secs_f64(self.pair_count() as f64 / rate).unwrap_or(Duration::MAX)
            }
            _ => Duration::ZERO,
        }
    }

    /// Decodes the payload into normalized `(i, q)` pairs.
    pub fn to_f32_pairs(&self) -> Vec<(f32, f32)> {
        iq_to_f32(&self.data, self.format)
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_count_per_format() {
        let block = IqBlock::new(vec![0; 48], SampleFormat::I24, None, 0, Duration::ZERO);
        assert_eq!(block.pair_count(), 8);
        let block = IqBlock::new(vec![0; 48], SampleFormat::U8, None, 0, Duration::ZERO);
        assert_eq!(block.pair_count(), 24);
    }

    #[test]
    fn test_duration_unknown_rate() {
        let block = IqBlock::new(vec![0; 64], SampleFormat::I16, None, 0, Duration::ZERO);
        assert_eq!(block.duration(), Duration::ZERO);
    }

    #[test]
    fn test_to_f32_pairs() {
        let block = IqBlock::new(vec![0x00, 0x40, 0x00, 0xC0], SampleFormat::I16, None, 0, Duration::ZERO);
        assert_eq!(block.to_f32_pairs(), vec![(0.5, -0.5)]);
    }

    #[test]
    fn test_clone_shares_payload() {
        let block = IqBlock::new(vec![1; 16], SampleFormat::I16, Some(1.0), 3, Duration::ZERO);
        let other = block.clone();
        assert!(Arc::ptr_eq(&block.data, &other.data));
        assert!(!other.is_empty());
    }
}
