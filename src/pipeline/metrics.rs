//! Producer-owned stream counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters incremented only by the callback thread.
#[derive(Debug, Default)]
pub(crate) struct StreamMetrics {
    callback_hits: AtomicU64,
    info_events: AtomicU64,
    data_events: AtomicU64,
    overruns: AtomicU64,
    timing_misses: AtomicU64,
    unrecognized_events: AtomicU64,
}

/// Which counter to bump.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    CallbackHits,
    InfoEvents,
    DataEvents,
    Overruns,
    TimingMisses,
    UnrecognizedEvents,
}

impl StreamMetrics {
    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::CallbackHits => &self.callback_hits,
            Counter::InfoEvents => &self.info_events,
            Counter::DataEvents => &self.data_events,
            Counter::Overruns => &self.overruns,
            Counter::TimingMisses => &self.timing_misses,
            Counter::UnrecognizedEvents => &self.unrecognized_events,
        }
    }

    /// Increments a counter and returns its new value.
    pub(crate) fn bump(&self, counter: Counter) -> u64 {
        self.counter(counter).fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.callback_hits,
            &self.info_events,
            &self.data_events,
            &self.overruns,
            &self.timing_misses,
            &self.unrecognized_events,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            callback_hits: self.callback_hits.load(Ordering::Relaxed),
            info_events: self.info_events.load(Ordering::Relaxed),
            data_events: self.data_events.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            timing_misses: self.timing_misses.load(Ordering::Relaxed),
            unrecognized_events: self.unrecognized_events.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the stream counters.
///
/// Each field is read independently, so a snapshot taken while the driver is
/// delivering callbacks may be off by one between fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Every callback invocation, of any kind.
    pub callback_hits: u64,
    /// Control notifications (`count == -1`).
    pub info_events: u64,
    /// Data bursts received while the stream was not halted.
    pub data_events: u64,
    /// Bursts dropped because the ring was full.
    pub overruns: u64,
    /// Bursts whose handling took longer than the expected interval.
    pub timing_misses: u64,
    /// Invocations with an unrecognized `count` discriminator.
    pub unrecognized_events: u64,
}
