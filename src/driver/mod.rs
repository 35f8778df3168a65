//! ExtIO driver call-through interface.
//!
//! The vendor plugin itself (a DLL exporting `InitHW`, `OpenHW`, `StartHW`,
//! ...) is loaded by an external collaborator that implements
//! [`ExtIoDriver`]. This module wraps such an implementation in an [`ExtIo`]
//! handle that detects the optional entry points once, records them in a
//! [`Capabilities`] table, and answers `NotSupported` for anything the
//! driver does not export instead of calling into it.

mod mock;
mod status;

pub use mock::MockDriver;
pub use status::HwStatus;

use std::fmt;
use std::sync::Arc;

use crate::{DriverError, SampleFormat};

/// Upper bound on list enumeration, guards against drivers that never
/// return the end-of-list sentinel.
const MAX_ENUMERATION: i32 = 256;

/// The callback a driver invokes for every data burst or control event.
///
/// Arguments are `(count, status, iq_offset, data)`. `data` is only valid
/// for the duration of the call.
pub type DriverCallback = Box<dyn FnMut(i32, i32, f32, &[u8]) + Send>;

/// Exported ExtIO entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// `InitHW`
    InitHw,
    /// `OpenHW`
    OpenHw,
    /// `StartHW` (32-bit LO)
    StartHw,
    /// `StartHW64` (64-bit LO)
    StartHw64,
    /// `StopHW`
    StopHw,
    /// `CloseHW`
    CloseHw,
    /// `SetCallback`
    SetCallback,
    /// `SetHWLO` (32-bit LO)
    SetHwLo,
    /// `SetHWLO64` (64-bit LO)
    SetHwLo64,
    /// `ExtIoGetSrates`
    GetSrates,
    /// `ExtIoGetActualSrateIdx`
    GetActualSrateIdx,
    /// `ExtIoSetSrate`
    SetSrate,
    /// `ExtIoGetSetting`
    GetSetting,
}

impl EntryPoint {
    /// Entry points a driver may leave out.
    pub const OPTIONAL: [EntryPoint; 7] = [
        Self::StartHw64,
        Self::SetHwLo,
        Self::SetHwLo64,
        Self::GetSrates,
        Self::GetActualSrateIdx,
        Self::SetSrate,
        Self::GetSetting,
    ];

    /// The exported symbol name.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::InitHw => "InitHW",
            Self::OpenHw => "OpenHW",
            Self::StartHw => "StartHW",
            Self::StartHw64 => "StartHW64",
            Self::StopHw => "StopHW",
            Self::CloseHw => "CloseHW",
            Self::SetCallback => "SetCallback",
            Self::SetHwLo => "SetHWLO",
            Self::SetHwLo64 => "SetHWLO64",
            Self::GetSrates => "ExtIoGetSrates",
            Self::GetActualSrateIdx => "ExtIoGetActualSrateIdx",
            Self::SetSrate => "ExtIoSetSrate",
            Self::GetSetting => "ExtIoGetSetting",
        }
    }

    /// Returns `true` if drivers may omit this entry point.
    #[must_use]
    pub fn is_optional(self) -> bool {
        Self::OPTIONAL.contains(&self)
    }

    fn bit(self) -> u16 {
        Self::OPTIONAL
            .iter()
            .position(|e| *e == self)
            .map_or(0, |i| 1 << i)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Which optional entry points a driver exports.
///
/// Populated once by [`Capabilities::detect`]; mandatory entry points are
/// always reported as supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u16);

impl Capabilities {
    /// Records every optional entry point the driver exports.
    pub fn detect<D: ExtIoDriver + ?Sized>(driver: &D) -> Self {
        let bits = EntryPoint::OPTIONAL
            .into_iter()
            .filter(|entry| driver.exports(*entry))
            .fold(0, |bits, entry| bits | entry.bit());
        Self(bits)
    }

    /// Returns `true` if the entry point can be called.
    #[must_use]
    pub fn supports(self, entry: EntryPoint) -> bool {
        !entry.is_optional() || self.0 & entry.bit() != 0
    }

    /// Optional entry points the driver does not export.
    pub fn missing(self) -> impl Iterator<Item = EntryPoint> {
        EntryPoint::OPTIONAL
            .into_iter()
            .filter(move |entry| !self.supports(*entry))
    }
}

/// Identity reported by `InitHW`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    /// Radio name.
    pub name: String,
    /// Radio model.
    pub model: String,
    /// Raw ExtIO hardware type id.
    pub hw_type: i32,
}

impl HardwareInfo {
    /// The IQ format implied by the hardware type, if it streams IQ.
    #[must_use]
    pub fn format(&self) -> Option<SampleFormat> {
        SampleFormat::from_hw_type(self.hw_type)
    }
}

/// Result of a `SetHWLO` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoStatus {
    /// The LO was set.
    Ok,
    /// The request was below the hardware minimum.
    BelowMinimum {
        /// Lowest frequency the hardware can generate, in Hz.
        minimum: u64,
    },
    /// The request was above the hardware maximum.
    AboveMaximum {
        /// Highest frequency the hardware can generate, in Hz.
        maximum: u64,
    },
}

impl LoStatus {
    /// Decodes the signed `SetHWLO` return value.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Ok,
            c if c < 0 => Self::BelowMinimum {
                minimum: c.unsigned_abs(),
            },
            c => Self::AboveMaximum { maximum: c as u64 },
        }
    }
}

/// A free-form driver setting from `ExtIoGetSetting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    /// Human-readable description.
    pub description: String,
    /// Current value, as text.
    pub value: String,
}

/// Raw call-through to an ExtIO plugin.
///
/// Methods mirror the exported C entry points and return their raw values.
/// Implementations must be callable from any thread; use interior mutability
/// where needed. Optional entry points have default bodies returning the
/// ExtIO failure sentinel; [`ExtIo`] never calls them unless
/// [`exports`](ExtIoDriver::exports) reported them present.
pub trait ExtIoDriver: Send + Sync {
    /// Returns `true` if the plugin exports `entry`.
    fn exports(&self, entry: EntryPoint) -> bool;

    /// `InitHW`: identifies the radio, `None` on failure.
    fn init_hw(&self) -> Option<HardwareInfo>;

    /// `OpenHW`: returns `true` on success.
    fn open_hw(&self) -> bool;

    /// `StartHW`: starts streaming at `lo_freq` Hz, returns IQ pairs per
    /// callback (non-positive on failure).
    fn start_hw(&self, lo_freq: i32) -> i32;

    /// `StopHW`.
    fn stop_hw(&self);

    /// `CloseHW`: returns `true` on success.
    fn close_hw(&self) -> bool;

    /// `SetCallback`: installs the data/control callback.
    fn set_callback(&self, callback: DriverCallback);

    /// `StartHW64`.
    fn start_hw64(&self, _lo_freq: i64) -> i32 {
        -1
    }

    /// `SetHWLO`.
    fn set_hw_lo(&self, _lo_freq: i32) -> i32 {
        0
    }

    /// `SetHWLO64`.
    fn set_hw_lo64(&self, _lo_freq: i64) -> i64 {
        0
    }

    /// `ExtIoGetSrates`: rate at `idx`, `None` past the end of the list.
    fn get_srates(&self, _idx: i32) -> Option<f64> {
        None
    }

    /// `ExtIoGetActualSrateIdx`.
    fn get_actual_srate_idx(&self) -> i32 {
        -1
    }

    /// `ExtIoSetSrate`: returns 0 on success.
    fn set_srate(&self, _idx: i32) -> i32 {
        -1
    }

    /// `ExtIoGetSetting`: setting at `idx`, `None` past the end of the list.
    fn get_setting(&self, _idx: i32) -> Option<Setting> {
        None
    }
}

/// A driver handle with a capability table.
///
/// Cheap to clone; clones share the driver.
pub struct ExtIo<D: ExtIoDriver + ?Sized> {
    driver: Arc<D>,
    capabilities: Capabilities,
}

impl<D: ExtIoDriver + ?Sized> Clone for ExtIo<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            capabilities: self.capabilities,
        }
    }
}

impl<D: ExtIoDriver + ?Sized> ExtIo<D> {
    /// Wraps a driver, probing its optional entry points once.
    pub fn new(driver: Arc<D>) -> Self {
        let capabilities = Capabilities::detect(&*driver);
        let missing: Vec<_> = capabilities.missing().map(EntryPoint::symbol).collect();
        tracing::debug!(?missing, "ExtIO driver capabilities detected");
        Self {
            driver,
            capabilities,
        }
    }

    /// The capability table recorded at construction.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    fn require(&self, entry: EntryPoint) -> Result<(), DriverError> {
        if self.capabilities.supports(entry) {
            Ok(())
        } else {
            Err(DriverError::NotSupported { entry_point: entry })
        }
    }

    /// Calls `InitHW`.
    pub fn init_hw(&self) -> Result<HardwareInfo, DriverError> {
        self.driver.init_hw().ok_or(DriverError::CallFailed {
            entry_point: EntryPoint::InitHw,
            code: 0,
        })
    }

    /// Calls `OpenHW`.
    pub fn open_hw(&self) -> Result<(), DriverError> {
        if self.driver.open_hw() {
            Ok(())
        } else {
            Err(DriverError::CallFailed {
                entry_point: EntryPoint::OpenHw,
                code: 0,
            })
        }
    }

    /// Starts streaming at `lo_freq` Hz and returns the IQ pairs per callback.
    ///
    /// Uses `StartHW64` when exported, falling back to `StartHW` for
    /// frequencies that fit in 32 bits.
    pub fn start_hw(&self, lo_freq: i64) -> Result<i32, DriverError> {
        let (entry_point, pairs) = if self.capabilities.supports(EntryPoint::StartHw64) {
            (EntryPoint::StartHw64, self.driver.start_hw64(lo_freq))
        } else {
            let lo = i32::try_from(lo_freq).map_err(|_| DriverError::CallFailed {
                entry_point: EntryPoint::StartHw,
                code: lo_freq,
            })?;
            (EntryPoint::StartHw, self.driver.start_hw(lo))
        };
        if pairs <= 0 {
            return Err(DriverError::CallFailed {
                entry_point,
                code: i64::from(pairs),
            });
        }
        Ok(pairs)
    }

    /// Calls `StopHW`.
    pub fn stop_hw(&self) {
        self.driver.stop_hw();
    }

    /// Calls `CloseHW`.
    pub fn close_hw(&self) -> Result<(), DriverError> {
        if self.driver.close_hw() {
            Ok(())
        } else {
            Err(DriverError::CallFailed {
                entry_point: EntryPoint::CloseHw,
                code: 0,
            })
        }
    }

    /// Installs the driver callback.
    pub fn set_callback(&self, callback: DriverCallback) {
        self.driver.set_callback(callback);
    }

    /// Retunes the local oscillator.
    ///
    /// Prefers `SetHWLO64`, falls back to `SetHWLO`.
    pub fn set_hw_lo(&self, lo_freq: i64) -> Result<LoStatus, DriverError> {
        if self.capabilities.supports(EntryPoint::SetHwLo64) {
            return Ok(LoStatus::from_code(self.driver.set_hw_lo64(lo_freq)));
        }
        self.require(EntryPoint::SetHwLo)?;
        let lo = i32::try_from(lo_freq).map_err(|_| DriverError::CallFailed {
            entry_point: EntryPoint::SetHwLo,
            code: lo_freq,
        })?;
        Ok(LoStatus::from_code(i64::from(self.driver.set_hw_lo(lo))))
    }

    /// Sample rate at list index `idx`, `Ok(None)` past the end of the list.
    pub fn sample_rate_at(&self, idx: i32) -> Result<Option<f64>, DriverError> {
        self.require(EntryPoint::GetSrates)?;
        Ok(self.driver.get_srates(idx))
    }

    /// Every sample rate the driver offers, in index order.
    pub fn sample_rates(&self) -> Result<Vec<f64>, DriverError> {
        self.require(EntryPoint::GetSrates)?;
        Ok((0..MAX_ENUMERATION)
            .map_while(|idx| self.driver.get_srates(idx))
            .collect())
    }

    /// Index of the active sample rate.
    pub fn actual_srate_idx(&self) -> Result<i32, DriverError> {
        self.require(EntryPoint::GetActualSrateIdx)?;
        let idx = self.driver.get_actual_srate_idx();
        if idx < 0 {
            return Err(DriverError::CallFailed {
                entry_point: EntryPoint::GetActualSrateIdx,
                code: i64::from(idx),
            });
        }
        Ok(idx)
    }

    /// Selects the sample rate at list index `idx`.
    pub fn set_srate(&self, idx: i32) -> Result<(), DriverError> {
        self.require(EntryPoint::SetSrate)?;
        match self.driver.set_srate(idx) {
            0 => Ok(()),
            code => Err(DriverError::CallFailed {
                entry_point: EntryPoint::SetSrate,
                code: i64::from(code),
            }),
        }
    }

    /// The active sample rate in Hz.
    pub fn current_sample_rate(&self) -> Result<f64, DriverError> {
        let idx = self.actual_srate_idx()?;
        self.sample_rate_at(idx)?.ok_or(DriverError::CallFailed {
            entry_point: EntryPoint::GetSrates,
            code: i64::from(idx),
        })
    }

    /// Setting at list index `idx`, `Ok(None)` past the end of the list.
    pub fn setting(&self, idx: i32) -> Result<Option<Setting>, DriverError> {
        self.require(EntryPoint::GetSetting)?;
        Ok(self.driver.get_setting(idx))
    }

    /// Every free-form setting the driver exposes.
    pub fn settings(&self) -> Result<Vec<Setting>, DriverError> {
        self.require(EntryPoint::GetSetting)?;
        Ok((0..MAX_ENUMERATION)
            .map_while(|idx| self.driver.get_setting(idx))
            .collect())
    }
}
