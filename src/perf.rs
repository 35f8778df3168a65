//! Burst timing log and performance report.
//!
//! The dispatcher records one [`BurstTiming`] per data burst into a
//! preallocated lock-free ring, dropping entries when it is full. A
//! [`PerfMonitor`] on the consumer side drains the log and aggregates it.

use std::time::Duration;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Timing of a single data burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstTiming {
    /// When the burst arrived, relative to the stream epoch.
    pub arrival: Duration,
    /// Time spent handling it on the driver thread.
    pub processing: Duration,
}

/// Producer side of the timing log.
pub struct TimingRecorder {
    producer: HeapProd<BurstTiming>,
}

impl TimingRecorder {
    /// Records a timing. Returns `false` if the log was full.
    pub fn record(&mut self, timing: BurstTiming) -> bool {
        self.producer.try_push(timing).is_ok()
    }
}

/// Creates a timing log holding up to `capacity` entries between polls.
pub fn timing_log(capacity: usize) -> (TimingRecorder, PerfMonitor) {
    let (producer, consumer) = HeapRb::<BurstTiming>::new(capacity.max(1)).split();
    (TimingRecorder { producer }, PerfMonitor::new(consumer))
}

/// Aggregates burst timings.
pub struct PerfMonitor {
    consumer: HeapCons<BurstTiming>,
    bursts: u64,
    processing_total: Duration,
    processing_max: Duration,
    last_arrival: Option<Duration>,
    interval_total: Duration,
    interval_count: u64,
    interval_min: Option<Duration>,
    interval_max: Option<Duration>,
    expected: Option<Duration>,
    late: u64,
}

impl PerfMonitor {
    fn new(consumer: HeapCons<BurstTiming>) -> Self {
        Self {
            consumer,
            bursts: 0,
            processing_total: Duration::ZERO,
            processing_max: Duration::ZERO,
            last_arrival: None,
            interval_total: Duration::ZERO,
            interval_count: 0,
            interval_min: None,
            interval_max: None,
            expected: None,
            late: 0,
        }
    }

    /// Drains pending timings, judging lateness against `expected`.
    ///
    /// Returns the number of timings consumed.
    pub fn poll(&mut self, expected: Option<Duration>) -> usize {
        if expected.is_some() {
            self.expected = expected;
        }
        let mut consumed = 0;
        while let Some(timing) = self.consumer.try_pop() {
            self.observe(timing);
            consumed += 1;
        }
        consumed
    }

    fn observe(&mut self, timing: BurstTiming) {
        self.bursts += 1;
        self.processing_total += timing.processing;
        self.processing_max = self.processing_max.max(timing.processing);
        if self.expected.is_some_and(|e| timing.processing > e) {
            self.late += 1;
        }

        if let Some(previous) = self.last_arrival {
            let interval = timing.arrival.saturating_sub(previous);
            self.interval_total += interval;
            self.interval_count += 1;
            self.interval_min = Some(self.interval_min.map_or(interval, |m| m.min(interval)));
            self.interval_max = Some(self.interval_max.map_or(interval, |m| m.max(interval)));
        }
        self.last_arrival = Some(timing.arrival);
    }

    /// Summary of everything observed so far.
    pub fn report(&self) -> PerfReport {
        PerfReport {
            bursts: self.bursts,
            mean_processing: mean(self.processing_total, self.bursts),
            max_processing: self.processing_max,
            mean_interval: (self.interval_count > 0)
                .then(|| mean(self.interval_total, self.interval_count)),
            min_interval: self.interval_min,
            max_interval: self.interval_max,
            expected_interval: self.expected,
            late_bursts: self.late,
        }
    }
}

fn mean(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

/// Aggregate burst timing statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfReport {
    /// Bursts observed.
    pub bursts: u64,
    /// Mean handling time per burst.
    pub mean_processing: Duration,
    /// Longest handling time.
    pub max_processing: Duration,
    /// Mean time between burst arrivals.
    pub mean_interval: Option<Duration>,
    /// Shortest time between arrivals.
    pub min_interval: Option<Duration>,
    /// Longest time between arrivals.
    pub max_interval: Option<Duration>,
    /// Expected time between bursts at the last known rate.
    pub expected_interval: Option<Duration>,
    /// Bursts whose handling took longer than the expected interval.
    pub late_bursts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_empty_report() {
        let (_recorder, monitor) = timing_log(8);
        let report = monitor.report();
        assert_eq!(report.bursts, 0);
        assert_eq!(report.mean_processing, Duration::ZERO);
        assert_eq!(report.mean_interval, None);
    }

    #[test]
    fn test_aggregates_intervals_and_processing() {
        let (mut recorder, mut monitor) = timing_log(8);
        for (arrival, processing) in [(0, 1), (10, 3), (30, 2)] {
            assert!(recorder.record(BurstTiming {
                arrival: ms(arrival),
                processing: ms(processing),
            }));
        }

        assert_eq!(monitor.poll(Some(ms(2))), 3);
        let report = monitor.report();
        assert_eq!(report.bursts, 3);
        assert_eq!(report.mean_processing, ms(2));
        assert_eq!(report.max_processing, ms(3));
        assert_eq!(report.mean_interval, Some(ms(15)));
        assert_eq!(report.min_interval, Some(ms(10)));
        assert_eq!(report.max_interval, Some(ms(20)));
        assert_eq!(report.expected_interval, Some(ms(2)));
        assert_eq!(report.late_bursts, 1);
    }

    #[test]
    fn test_full_log_drops() {
        let (mut recorder, mut monitor) = timing_log(2);
        let timing = BurstTiming {
            arrival: Duration::ZERO,
            processing: Duration::ZERO,
        };
        assert!(recorder.record(timing));
        assert!(recorder.record(timing));
        assert!(!recorder.record(timing));
        assert_eq!(monitor.poll(None), 2);
    }
}
