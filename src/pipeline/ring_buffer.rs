//! Fixed-slot SPSC ring shared by the driver callback and the consumer.
//!
//! The driver thread is the only writer of `head`, the consumer the only
//! writer of `tail`. Both are monotonic counters; a slot index is the counter
//! modulo the slot count. The ring is empty when `head == tail` and full when
//! `head.wrapping_sub(tail) == slot_count`.
//!
//! A slot's bytes are written before `head` is published with release
//! ordering, and the consumer loads `head` with acquire ordering before
//! reading, so a published slot is always fully written. The same pairing on
//! `tail` hands slots back to the producer.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crossbeam_utils::CachePadded;

use super::metrics::{MetricsSnapshot, StreamMetrics};
use crate::{CaptureError, FormatSet, IqBlock, SampleFormat};

const NO_FATAL: u8 = u8::MAX;

struct SlotData {
    bytes: Box<[u8]>,
    len: usize,
    format: SampleFormat,
    sample_rate: Option<f64>,
    sequence: u64,
    arrival: Duration,
}

struct Slot(UnsafeCell<SlotData>);

// SAFETY: a slot is only touched by the producer while it lies in
// [head, tail + N) and only by the consumer while it lies in [tail, head).
// The index protocol keeps the two ranges disjoint.
unsafe impl Sync for Slot {}

struct SlotRing {
    slots: Box<[Slot]>,
    pair_count: usize,
    slot_bytes: usize,
}

/// Shared state between the driver callback and the consumer.
///
/// Create it before installing the driver callback, [`configure`] it once
/// `StartHW` has reported the burst size, then [`set_enabled`] to begin
/// storing data. Callbacks that arrive before `configure` are counted but
/// never stored.
///
/// [`configure`]: StreamState::configure
/// [`set_enabled`]: StreamState::set_enabled
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use extio_stream::{FormatSet, SampleFormat, StreamState};
///
/// let state = Arc::new(StreamState::new(SampleFormat::I16));
/// state.configure(FormatSet::single(SampleFormat::I16), 512, 8)?;
///
/// assert_eq!(state.slot_count(), 8);
/// assert_eq!(state.bytes_per_burst(), 2048);
/// assert!(state.is_empty());
/// # Ok::<(), extio_stream::CaptureError>(())
/// ```
pub struct StreamState {
    ring: OnceLock<SlotRing>,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    format: AtomicU8,
    supported: AtomicU8,
    sample_rate_bits: AtomicU64,
    expected_interval_ns: AtomicU64,
    enabled: AtomicBool,
    fatal: AtomicU8,
    producer_taken: AtomicBool,
    consumer_taken: AtomicBool,
    pub(crate) metrics: StreamMetrics,
    epoch: Instant,
}

impl StreamState {
    /// Creates an unconfigured, disabled stream carrying `format`.
    ///
    /// Every format counts as supported until [`configure`](Self::configure)
    /// narrows the set.
    pub fn new(format: SampleFormat) -> Self {
        Self {
            ring: OnceLock::new(),
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            format: AtomicU8::new(format.to_bits()),
            supported: AtomicU8::new(FormatSet::ALL.bits()),
            sample_rate_bits: AtomicU64::new(0),
            expected_interval_ns: AtomicU64::new(0),
            enabled: AtomicBool::new(false),
            fatal: AtomicU8::new(NO_FATAL),
            producer_taken: AtomicBool::new(false),
            consumer_taken: AtomicBool::new(false),
            metrics: StreamMetrics::default(),
            epoch: Instant::now(),
        }
    }

    /// Allocates `slot_count` slots of `pair_count` pairs each.
    ///
    /// Slots are sized for the widest format in `supported`, so a later
    /// format change within the set never needs a reallocation.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::Configuration`] if `pair_count <= 0`,
    ///   `slot_count < 2`, `supported` is empty, the stream is enabled, or
    ///   the ring was already configured.
    /// - [`CaptureError::UnsupportedFormat`] if the current format is not in
    ///   `supported`.
    pub fn configure(
        &self,
        supported: FormatSet,
        pair_count: i32,
        slot_count: usize,
    ) -> Result<(), CaptureError> {
        if self.is_enabled() {
            return Err(CaptureError::configuration("cannot configure while streaming"));
        }
        let pairs = usize::try_from(pair_count)
            .ok()
            .filter(|&p| p > 0)
            .ok_or_else(|| {
                CaptureError::configuration(format!("pair count must be positive, got {pair_count}"))
            })?;
        if slot_count < 2 {
            return Err(CaptureError::configuration(format!(
                "slot count must be at least 2, got {slot_count}"
            )));
        }
        let widest = supported
            .widest()
            .ok_or_else(|| CaptureError::configuration("no supported sample formats"))?;
        let format = self.format();
        if !supported.contains(format) {
            return Err(CaptureError::UnsupportedFormat { format });
        }

        let slot_bytes = pairs * widest.bytes_per_pair();
        let slots = (0..slot_count)
            .map(|_| {
                Slot(UnsafeCell::new(SlotData {
                    bytes: vec![0u8; slot_bytes].into_boxed_slice(),
                    len: 0,
                    format,
                    sample_rate: None,
                    sequence: 0,
                    arrival: Duration::ZERO,
                }))
            })
            .collect();

        self.ring
            .set(SlotRing {
                slots,
                pair_count: pairs,
                slot_bytes,
            })
            .map_err(|_| CaptureError::configuration("stream is already configured"))?;

        self.supported.store(supported.bits(), Ordering::Release);
        self.update_expected_interval();

        tracing::debug!(
            pair_count = pairs,
            slot_count,
            slot_bytes,
            %format,
            "slot ring configured"
        );
        Ok(())
    }

    /// Clears indices, counters, and any fatal format latch.
    ///
    /// The tail index belongs to the consumer, so a [`SlotConsumer`] must not
    /// be alive; drop it first and take a new one afterwards.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::ResetWhileStreaming`] if the stream is enabled.
    /// - [`CaptureError::RoleTaken`] while a consumer is attached.
    pub fn reset(&self) -> Result<(), CaptureError> {
        if self.is_enabled() {
            return Err(CaptureError::ResetWhileStreaming);
        }
        if self.consumer_taken.load(Ordering::Acquire) {
            return Err(CaptureError::RoleTaken { role: "consumer" });
        }
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
        self.metrics.reset();
        self.fatal.store(NO_FATAL, Ordering::Release);
        Ok(())
    }

    /// Turns storage of data bursts on or off.
    ///
    /// # Errors
    ///
    /// Enabling fails with [`CaptureError::Configuration`] before
    /// [`configure`](Self::configure), and with
    /// [`CaptureError::UnsupportedFormat`] once the stream has halted on an
    /// unsupported format. Disabling always succeeds.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), CaptureError> {
        if enabled {
            if !self.is_configured() {
                return Err(CaptureError::configuration("stream is not configured"));
            }
            if let Some(format) = self.fatal_format() {
                return Err(CaptureError::UnsupportedFormat { format });
            }
        }
        self.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    /// Returns `true` while data bursts are being stored.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns `true` once the ring has been allocated.
    pub fn is_configured(&self) -> bool {
        self.ring.get().is_some()
    }

    /// Number of slots, or zero before configuration.
    pub fn slot_count(&self) -> usize {
        self.ring.get().map_or(0, |r| r.slots.len())
    }

    /// IQ pairs per burst, or zero before configuration.
    pub fn pair_count(&self) -> usize {
        self.ring.get().map_or(0, |r| r.pair_count)
    }

    /// Bytes in one burst of the current format.
    pub fn bytes_per_burst(&self) -> usize {
        self.pair_count() * self.format().bytes_per_pair()
    }

    /// Capacity of each slot in bytes.
    pub fn slot_bytes(&self) -> usize {
        self.ring.get().map_or(0, |r| r.slot_bytes)
    }

    /// Bursts stored and not yet consumed.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.saturating_sub(tail) as usize
    }

    /// Returns `true` when no stored burst is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when the next burst would be dropped.
    pub fn is_full(&self) -> bool {
        self.is_configured() && self.len() >= self.slot_count()
    }

    /// Slot the producer writes next.
    pub fn head_index(&self) -> usize {
        self.slot_index(self.head.load(Ordering::Acquire))
    }

    /// Slot the consumer reads next.
    pub fn tail_index(&self) -> usize {
        self.slot_index(self.tail.load(Ordering::Acquire))
    }

    fn slot_index(&self, counter: u64) -> usize {
        match self.slot_count() {
            0 => 0,
            n => (counter % n as u64) as usize,
        }
    }

    /// Current sample format.
    pub fn format(&self) -> SampleFormat {
        SampleFormat::from_bits(self.format.load(Ordering::Acquire))
    }

    pub(crate) fn set_format(&self, format: SampleFormat) {
        self.format.store(format.to_bits(), Ordering::Release);
    }

    /// Formats the consumer accepts.
    pub fn supported_formats(&self) -> FormatSet {
        FormatSet::from_raw(self.supported.load(Ordering::Acquire))
    }

    /// Current sample rate in Hz, if known.
    pub fn sample_rate(&self) -> Option<f64> {
        let rate = f64::from_bits(self.sample_rate_bits.load(Ordering::Acquire));
        (rate > 0.0).then_some(rate)
    }

    /// Records a new sample rate and recomputes the expected burst interval.
    ///
    /// Non-positive or non-finite rates mark the rate as unknown.
    pub fn set_sample_rate(&self, rate: f64) {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 0.0 };
        self.sample_rate_bits.store(rate.to_bits(), Ordering::Release);
        self.update_expected_interval();
    }

    /// Time between bursts at the current rate and pair count.
    pub fn expected_interval(&self) -> Option<Duration> {
        match self.expected_interval_ns.load(Ordering::Acquire) {
            0 => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    fn update_expected_interval(&self) {
        let nanos = match (self.sample_rate(), self.pair_count()) {
            (Some(rate), pairs) if pairs > 0 => Duration::try_from_secs_f64(pairs as f64 / rate)
                .map_or(u64::MAX, |interval| {
                    u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX)
                })
                .max(1),
            _ => 0,
        };
        self.expected_interval_ns.store(nanos, Ordering::Release);
    }

    /// The unsupported format that halted the stream, if any.
    pub fn fatal_format(&self) -> Option<SampleFormat> {
        match self.fatal.load(Ordering::Acquire) {
            NO_FATAL => None,
            bits => Some(SampleFormat::from_bits(bits)),
        }
    }

    /// Returns `true` once an unsupported format has halted the stream.
    pub fn is_halted(&self) -> bool {
        self.fatal_format().is_some()
    }

    /// Latches the fatal format. Returns `true` only for the first caller.
    pub(crate) fn halt(&self, format: SampleFormat) -> bool {
        self.fatal
            .compare_exchange(NO_FATAL, format.to_bits(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// A copy of the stream counters.
    pub fn snapshot_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Instant that burst timestamps are measured from.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Claims the consumer role.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::RoleTaken`] while another consumer is alive.
    pub fn take_consumer(self: &Arc<Self>) -> Result<SlotConsumer, CaptureError> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            return Err(CaptureError::RoleTaken { role: "consumer" });
        }
        Ok(SlotConsumer {
            state: Arc::clone(self),
        })
    }

    pub(crate) fn take_producer(self: &Arc<Self>) -> Result<SlotProducer, CaptureError> {
        if self.producer_taken.swap(true, Ordering::AcqRel) {
            return Err(CaptureError::RoleTaken { role: "producer" });
        }
        Ok(SlotProducer {
            state: Arc::clone(self),
        })
    }
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("slot_count", &self.slot_count())
            .field("pair_count", &self.pair_count())
            .field("format", &self.format())
            .field("sample_rate", &self.sample_rate())
            .field("enabled", &self.is_enabled())
            .field("len", &self.len())
            .field("fatal", &self.fatal_format())
            .finish_non_exhaustive()
    }
}

/// Result of offering a burst to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Stored { sequence: u64 },
    Full,
    Unconfigured,
}

/// Write side of the ring, owned by the callback dispatcher.
pub(crate) struct SlotProducer {
    state: Arc<StreamState>,
}

impl SlotProducer {
    /// Copies `data` into the next free slot, truncated to the slot size.
    pub(crate) fn push(
        &mut self,
        data: &[u8],
        format: SampleFormat,
        sample_rate: Option<f64>,
        arrival: Duration,
    ) -> PushOutcome {
        let Some(ring) = self.state.ring.get() else {
            return PushOutcome::Unconfigured;
        };
        let head = self.state.head.load(Ordering::Relaxed);
        let tail = self.state.tail.load(Ordering::Acquire);
        let n = ring.slots.len() as u64;
        if head.wrapping_sub(tail) >= n {
            return PushOutcome::Full;
        }

        let slot = &ring.slots[(head % n) as usize];
        // SAFETY: head - tail < n, so this slot is outside [tail, head) and
        // the consumer will not look at it until head is published below.
        let dst = unsafe { &mut *slot.0.get() };
        let len = data.len().min(dst.bytes.len());
        dst.bytes[..len].copy_from_slice(&data[..len]);
        dst.len = len;
        dst.format = format;
        dst.sample_rate = sample_rate;
        dst.sequence = head;
        dst.arrival = arrival;

        self.state.head.store(head + 1, Ordering::Release);
        PushOutcome::Stored { sequence: head }
    }
}

/// A borrowed view of the slot under the consumer's tail.
#[derive(Debug, Clone, Copy)]
pub struct SlotRef<'a> {
    /// The burst payload.
    pub data: &'a [u8],
    /// Format of `data`.
    pub format: SampleFormat,
    /// Sample rate when the burst arrived.
    pub sample_rate: Option<f64>,
    /// Sequence number assigned when the burst was stored.
    pub sequence: u64,
    /// Arrival time relative to [`StreamState::epoch`].
    pub arrival: Duration,
}

/// Read side of the ring.
///
/// Obtained once per stream from [`StreamState::take_consumer`].
pub struct SlotConsumer {
    state: Arc<StreamState>,
}

impl SlotConsumer {
    /// Calls `f` with the oldest stored burst, then releases its slot.
    ///
    /// Returns `None` without calling `f` when the ring is empty.
    pub fn try_read<R>(&mut self, f: impl FnOnce(SlotRef<'_>) -> R) -> Option<R> {
        let ring = self.state.ring.get()?;
        let tail = self.state.tail.load(Ordering::Relaxed);
        let head = self.state.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let n = ring.slots.len() as u64;
        let slot = &ring.slots[(tail % n) as usize];
        // SAFETY: tail < head, so the producer published this slot and will
        // not reuse it until tail advances past it.
        let src = unsafe { &*slot.0.get() };
        let result = f(SlotRef {
            data: &src.bytes[..src.len],
            format: src.format,
            sample_rate: src.sample_rate,
            sequence: src.sequence,
            arrival: src.arrival,
        });

        self.state.tail.store(tail + 1, Ordering::Release);
        Some(result)
    }

    /// Copies the oldest stored burst out as an [`IqBlock`].
    pub fn try_pop(&mut self) -> Option<IqBlock> {
        self.try_read(|slot| {
            IqBlock::new(
                slot.data.to_vec(),
                slot.format,
                slot.sample_rate,
                slot.sequence,
                slot.arrival,
            )
        })
    }

    /// Waits up to `timeout` for a burst, backing off between polls.
    ///
    /// Blocks the calling thread; use [`try_pop`](Self::try_pop) from async
    /// code.
    pub fn pop_timeout(&mut self, timeout: Duration) -> Option<IqBlock> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_micros(100);
        loop {
            if let Some(block) = self.try_pop() {
                return Some(block);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(Duration::from_millis(20));
        }
    }

    /// Pops every stored burst.
    pub fn drain(&mut self) -> Vec<IqBlock> {
        let mut blocks = Vec::with_capacity(self.available());
        while let Some(block) = self.try_pop() {
            blocks.push(block);
        }
        blocks
    }

    /// Bursts waiting to be read.
    pub fn available(&self) -> usize {
        self.state.len()
    }

    /// The stream this consumer reads from.
    pub fn stream(&self) -> &Arc<StreamState> {
        &self.state
    }
}

impl Drop for SlotConsumer {
    fn drop(&mut self) {
        self.state.consumer_taken.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for SlotConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotConsumer")
            .field("available", &self.available())
            .finish()
    }
}
