//! ExtIO hardware status codes delivered through the callback.

use crate::SampleFormat;

/// Status values carried by control callbacks (`count == -1`).
///
/// Codes follow the `extHWstatusT` enumeration of the ExtIO interface.
/// Unknown codes are preserved in [`HwStatus::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwStatus {
    /// Hardware disconnected.
    Disconnected,
    /// Hardware ready.
    Ready,
    /// Hardware running.
    Running,
    /// Hardware error.
    Error,
    /// Signal overload.
    Overload,
    /// Sample rate changed; the host must re-query it.
    ChangedSampleRate,
    /// Local oscillator changed.
    ChangedLo,
    /// Host must not change the LO.
    LockLo,
    /// Host may change the LO again.
    UnlockLo,
    /// LO changed without a tune change.
    ChangedLoNotTune,
    /// Tune frequency changed.
    ChangedTune,
    /// Demodulation mode changed.
    ChangedMode,
    /// Hardware requests the host to start.
    Start,
    /// Hardware requests the host to stop.
    Stop,
    /// Filter changed.
    ChangedFilter,
    /// Mercury DAC enabled.
    MercuryDacOn,
    /// Mercury DAC disabled.
    MercuryDacOff,
    /// PC audio output enabled.
    PcAudioOn,
    /// PC audio output disabled.
    PcAudioOff,
    /// Audio mute requested.
    AudioMuteOn,
    /// Audio unmute requested.
    AudioMuteOff,
    /// RF or IF frequency changed.
    ChangedRfIf,
    /// Stream switched to the given IQ sample format.
    SampleFormat(SampleFormat),
    /// Any other status code.
    Other(i32),
}

impl HwStatus {
    /// Decodes a raw status code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Disconnected,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Error,
            4 => Self::Overload,
            100 => Self::ChangedSampleRate,
            101 => Self::ChangedLo,
            102 => Self::LockLo,
            103 => Self::UnlockLo,
            104 => Self::ChangedLoNotTune,
            105 => Self::ChangedTune,
            106 => Self::ChangedMode,
            107 => Self::Start,
            108 => Self::Stop,
            109 => Self::ChangedFilter,
            110 => Self::MercuryDacOn,
            111 => Self::MercuryDacOff,
            112 => Self::PcAudioOn,
            113 => Self::PcAudioOff,
            114 => Self::AudioMuteOn,
            115 => Self::AudioMuteOff,
            116 => Self::ChangedRfIf,
            126 => Self::SampleFormat(SampleFormat::U8),
            127 => Self::SampleFormat(SampleFormat::I16),
            128 => Self::SampleFormat(SampleFormat::I24),
            129 => Self::SampleFormat(SampleFormat::I32),
            130 => Self::SampleFormat(SampleFormat::F32),
            other => Self::Other(other),
        }
    }

    /// The raw status code.
    ///
    /// Signed 8-bit has no in-band notification in the ExtIO interface, so
    /// `SampleFormat(I8)` has no code and returns `None`.
    #[must_use]
    pub const fn code(self) -> Option<i32> {
        let code = match self {
            Self::Disconnected => 0,
            Self::Ready => 1,
            Self::Running => 2,
            Self::Error => 3,
            Self::Overload => 4,
            Self::ChangedSampleRate => 100,
            Self::ChangedLo => 101,
            Self::LockLo => 102,
            Self::UnlockLo => 103,
            Self::ChangedLoNotTune => 104,
            Self::ChangedTune => 105,
            Self::ChangedMode => 106,
            Self::Start => 107,
            Self::Stop => 108,
            Self::ChangedFilter => 109,
            Self::MercuryDacOn => 110,
            Self::MercuryDacOff => 111,
            Self::PcAudioOn => 112,
            Self::PcAudioOff => 113,
            Self::AudioMuteOn => 114,
            Self::AudioMuteOff => 115,
            Self::ChangedRfIf => 116,
            Self::SampleFormat(SampleFormat::U8) => 126,
            Self::SampleFormat(SampleFormat::I16) => 127,
            Self::SampleFormat(SampleFormat::I24) => 128,
            Self::SampleFormat(SampleFormat::I32) => 129,
            Self::SampleFormat(SampleFormat::F32) => 130,
            Self::SampleFormat(SampleFormat::I8) => return None,
            Self::Other(code) => code,
        };
        Some(code)
    }
}
