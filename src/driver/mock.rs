//! Scriptable ExtIO driver for testing without hardware.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use super::{DriverCallback, EntryPoint, ExtIoDriver, HardwareInfo, HwStatus, Setting};
use crate::SampleFormat;

/// An in-process [`ExtIoDriver`] that records calls and lets tests inject
/// callback events.
///
/// Events are delivered synchronously on the calling thread, which then plays
/// the role of the driver's callback thread.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use extio_stream::driver::{ExtIo, MockDriver};
///
/// let mock = MockDriver::new(3).with_pairs(512).with_sample_rates(&[96_000.0]);
/// let io = ExtIo::new(Arc::new(mock));
///
/// let info = io.init_hw().unwrap();
/// assert_eq!(info.hw_type, 3);
/// assert_eq!(io.start_hw(7_100_000).unwrap(), 512);
/// ```
pub struct MockDriver {
    state: Mutex<MockState>,
    callback: Mutex<Option<DriverCallback>>,
}

struct MockState {
    info: HardwareInfo,
    missing: HashSet<EntryPoint>,
    pairs: i32,
    format: SampleFormat,
    sample_rates: Vec<f64>,
    srate_idx: usize,
    settings: Vec<Setting>,
    lo_range: (i64, i64),
    lo_freq: i64,
    open_succeeds: bool,
    open: bool,
    running: bool,
    calls: HashMap<EntryPoint, usize>,
}

impl MockDriver {
    /// Creates a mock radio reporting the given ExtIO hardware type.
    ///
    /// Defaults: 512 pairs per callback, rates 48/96/192 kHz with 96 kHz
    /// active, every optional entry point exported.
    pub fn new(hw_type: i32) -> Self {
        Self {
            state: Mutex::new(MockState {
                info: HardwareInfo {
                    name: "Mock".to_string(),
                    model: "MockSDR".to_string(),
                    hw_type,
                },
                missing: HashSet::new(),
                pairs: 512,
                format: SampleFormat::from_hw_type(hw_type).unwrap_or(SampleFormat::I16),
                sample_rates: vec![48_000.0, 96_000.0, 192_000.0],
                srate_idx: 1,
                settings: Vec::new(),
                lo_range: (1, 6_000_000_000),
                lo_freq: 0,
                open_succeeds: true,
                open: false,
                running: false,
                calls: HashMap::new(),
            }),
            callback: Mutex::new(None),
        }
    }

    /// Sets the IQ pairs returned by `StartHW`.
    #[must_use]
    pub fn with_pairs(self, pairs: i32) -> Self {
        self.state.lock().pairs = pairs;
        self
    }

    /// Replaces the sample rate list; the first entry becomes active.
    #[must_use]
    pub fn with_sample_rates(self, rates: &[f64]) -> Self {
        {
            let mut state = self.state.lock();
            state.sample_rates = rates.to_vec();
            state.srate_idx = 0;
        }
        self
    }

    /// Adds a free-form setting.
    #[must_use]
    pub fn with_setting(self, description: &str, value: &str) -> Self {
        self.state.lock().settings.push(Setting {
            description: description.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Sets the LO range enforced by `SetHWLO`.
    #[must_use]
    pub fn with_lo_range(self, min: i64, max: i64) -> Self {
        self.state.lock().lo_range = (min, max);
        self
    }

    /// Removes an optional entry point from the exports.
    #[must_use]
    pub fn without(self, entry: EntryPoint) -> Self {
        self.state.lock().missing.insert(entry);
        self
    }

    /// Makes `OpenHW` report failure.
    #[must_use]
    pub fn failing_open(self) -> Self {
        self.state.lock().open_succeeds = false;
        self
    }

    /// How many times `entry` was called.
    pub fn call_count(&self, entry: EntryPoint) -> usize {
        self.state.lock().calls.get(&entry).copied().unwrap_or(0)
    }

    /// The last LO frequency passed to `StartHW` or `SetHWLO`.
    pub fn lo_frequency(&self) -> i64 {
        self.state.lock().lo_freq
    }

    /// Returns `true` between `OpenHW` and `CloseHW`.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Returns `true` between `StartHW` and `StopHW`.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Returns `true` once `SetCallback` has been called.
    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Changes the active rate index as the radio's own UI would.
    ///
    /// Follow with [`emit_control`](Self::emit_control) of
    /// [`HwStatus::ChangedSampleRate`] to notify the host.
    pub fn set_active_rate_index(&self, idx: usize) {
        self.state.lock().srate_idx = idx;
    }

    /// A burst payload of the current format filled with `fill`.
    pub fn burst(&self, fill: u8) -> Vec<u8> {
        let state = self.state.lock();
        let pairs = usize::try_from(state.pairs).unwrap_or(0);
        vec![fill; pairs * state.format.bytes_per_pair()]
    }

    /// Delivers a data event. Returns `false` if no callback is installed.
    pub fn emit_data(&self, data: &[u8]) -> bool {
        let count = i32::try_from(data.len()).unwrap_or(i32::MAX);
        self.emit_raw(count, 0, 0.0, data)
    }

    /// Delivers a control event. Format notifications also switch the
    /// format used by [`burst`](Self::burst).
    ///
    /// Returns `false` without delivering anything if no callback is
    /// installed or `status` has no wire code.
    pub fn emit_control(&self, status: HwStatus) -> bool {
        let Some(code) = status.code() else {
            return false;
        };
        if !self.has_callback() {
            return false;
        }
        if let HwStatus::SampleFormat(format) = status {
            self.state.lock().format = format;
        }
        self.emit_raw(-1, code, 0.0, &[])
    }

    /// Delivers an arbitrary callback invocation.
    pub fn emit_raw(&self, count: i32, status: i32, iq_offset: f32, data: &[u8]) -> bool {
        let mut guard = self.callback.lock();
        match guard.as_mut() {
            Some(callback) => {
                callback(count, status, iq_offset, data);
                true
            }
            None => false,
        }
    }

    fn record(&self, entry: EntryPoint) -> parking_lot::MutexGuard<'_, MockState> {
        let mut state = self.state.lock();
        *state.calls.entry(entry).or_insert(0) += 1;
        state
    }

    fn lo_result(state: &mut MockState, lo_freq: i64) -> i64 {
        let (min, max) = state.lo_range;
        if lo_freq < min {
            -min
        } else if lo_freq > max {
            max
        } else {
            state.lo_freq = lo_freq;
            0
        }
    }
}

impl ExtIoDriver for MockDriver {
    fn exports(&self, entry: EntryPoint) -> bool {
        !self.state.lock().missing.contains(&entry)
    }

    fn init_hw(&self) -> Option<HardwareInfo> {
        Some(self.record(EntryPoint::InitHw).info.clone())
    }

    fn open_hw(&self) -> bool {
        let mut state = self.record(EntryPoint::OpenHw);
        state.open = state.open_succeeds;
        state.open
    }

    fn start_hw(&self, lo_freq: i32) -> i32 {
        let mut state = self.record(EntryPoint::StartHw);
        state.lo_freq = i64::from(lo_freq);
        state.running = state.pairs > 0;
        state.pairs
    }

    fn start_hw64(&self, lo_freq: i64) -> i32 {
        let mut state = self.record(EntryPoint::StartHw64);
        state.lo_freq = lo_freq;
        state.running = state.pairs > 0;
        state.pairs
    }

    fn stop_hw(&self) {
        self.record(EntryPoint::StopHw).running = false;
    }

    fn close_hw(&self) -> bool {
        let mut state = self.record(EntryPoint::CloseHw);
        let was_open = state.open;
        state.open = false;
        was_open
    }

    fn set_callback(&self, callback: DriverCallback) {
        drop(self.record(EntryPoint::SetCallback));
        *self.callback.lock() = Some(callback);
    }

    fn set_hw_lo(&self, lo_freq: i32) -> i32 {
        let mut state = self.record(EntryPoint::SetHwLo);
        let result = Self::lo_result(&mut state, i64::from(lo_freq));
        i32::try_from(result).unwrap_or(i32::MAX)
    }

    fn set_hw_lo64(&self, lo_freq: i64) -> i64 {
        let mut state = self.record(EntryPoint::SetHwLo64);
        Self::lo_result(&mut state, lo_freq)
    }

    fn get_srates(&self, idx: i32) -> Option<f64> {
        let state = self.record(EntryPoint::GetSrates);
        usize::try_from(idx)
            .ok()
            .and_then(|i| state.sample_rates.get(i).copied())
    }

    fn get_actual_srate_idx(&self) -> i32 {
        let state = self.record(EntryPoint::GetActualSrateIdx);
        i32::try_from(state.srate_idx).unwrap_or(-1)
    }

    fn set_srate(&self, idx: i32) -> i32 {
        let mut state = self.record(EntryPoint::SetSrate);
        match usize::try_from(idx) {
            Ok(i) if i < state.sample_rates.len() => {
                state.srate_idx = i;
                0
            }
            _ => -1,
        }
    }

    fn get_setting(&self, idx: i32) -> Option<Setting> {
        let state = self.record(EntryPoint::GetSetting);
        usize::try_from(idx)
            .ok()
            .and_then(|i| state.settings.get(i).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_emit_without_callback() {
        let mock = MockDriver::new(3);
        assert!(!mock.emit_data(&[0; 4]));
        assert!(!mock.has_callback());
    }

    #[test]
    fn test_emit_reaches_callback() {
        let mock = MockDriver::new(3);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        mock.set_callback(Box::new(move |count, _, _, data| {
            assert_eq!(count as usize, data.len());
            seen_cb.fetch_add(data.len(), Ordering::SeqCst);
        }));

        assert!(mock.emit_data(&mock.burst(1)));
        assert_eq!(seen.load(Ordering::SeqCst), 512 * 4);
    }

    #[test]
    fn test_format_control_changes_burst_size() {
        let mock = MockDriver::new(3).with_pairs(8);
        mock.set_callback(Box::new(|_, _, _, _| {}));
        assert_eq!(mock.burst(0).len(), 32);
        assert!(mock.emit_control(HwStatus::SampleFormat(SampleFormat::F32)));
        assert_eq!(mock.burst(0).len(), 64);
    }

    #[test]
    fn test_signed_8_bit_control_is_not_delivered() {
        let mock = MockDriver::new(3).with_pairs(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        mock.set_callback(Box::new(move |_, _, _, _| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!mock.emit_control(HwStatus::SampleFormat(SampleFormat::I8)));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(mock.burst(0).len(), 32);
    }

    #[test]
    fn test_lifecycle_flags() {
        let mock = MockDriver::new(3);
        assert!(mock.open_hw());
        assert!(mock.is_open());
        assert_eq!(mock.start_hw(1_000), 512);
        assert!(mock.is_running());
        mock.stop_hw();
        assert!(!mock.is_running());
        assert!(mock.close_hw());
        assert!(!mock.is_open());
    }

    #[test]
    fn test_failing_open() {
        let mock = MockDriver::new(3).failing_open();
        assert!(!mock.open_hw());
        assert!(!mock.close_hw());
    }
}
