//! IQ sample formats and conversion utilities.
//!
//! ExtIO drivers announce their sample encoding either through the hardware
//! type reported by `InitHW` or through in-band `SampleFmt_IQ_*` status
//! notifications. [`SampleFormat`] is the closed set of encodings the crate
//! can buffer; [`FormatSet`] is the set a session agrees to accept.

mod convert;

pub use convert::{iq_to_f32, offset_binary_i8};

use std::fmt;

/// IQ sample encodings delivered by ExtIO radios.
///
/// Every IQ pair carries two samples (I then Q) of this width, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit (`exthwUSBdataU8`).
    U8,
    /// Signed 8-bit (`exthwUSBdataS8`).
    I8,
    /// Signed 16-bit (`exthwUSBdata16`).
    I16,
    /// Signed packed 24-bit (`exthwUSBdata24`).
    I24,
    /// Signed 32-bit (`exthwUSBdata32`).
    I32,
    /// IEEE 32-bit float (`exthwUSBfloat32`).
    F32,
}

impl SampleFormat {
    /// All formats, narrowest first.
    pub const ALL: [SampleFormat; 6] = [
        Self::U8,
        Self::I8,
        Self::I16,
        Self::I24,
        Self::I32,
        Self::F32,
    ];

    /// Width of a single I or Q sample in bytes.
    #[must_use]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::I16 => 2,
            Self::I24 => 3,
            Self::I32 | Self::F32 => 4,
        }
    }

    /// Width of one IQ pair in bytes.
    #[must_use]
    pub const fn bytes_per_pair(self) -> usize {
        self.bytes_per_sample() * 2
    }

    /// Bits per sample as written into a WAV `fmt ` chunk.
    #[must_use]
    pub const fn bits_per_sample(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }

    /// WAV format tag: 3 (IEEE float) for `F32`, 1 (PCM) otherwise.
    #[must_use]
    pub const fn wav_format_tag(self) -> u16 {
        match self {
            Self::F32 => 3,
            _ => 1,
        }
    }

    /// Maps an ExtIO hardware type id to the format it streams.
    ///
    /// Returns `None` for hardware types that do not deliver IQ through the
    /// callback (sound card types, SDR-14, HPSDR, ...).
    #[must_use]
    pub const fn from_hw_type(hw_type: i32) -> Option<Self> {
        match hw_type {
            3 => Some(Self::I16),
            5 => Some(Self::I24),
            6 => Some(Self::I32),
            7 => Some(Self::F32),
            9 => Some(Self::U8),
            10 => Some(Self::I8),
            _ => None,
        }
    }

    /// The ExtIO hardware type id for this format.
    #[must_use]
    pub const fn hw_type(self) -> i32 {
        match self {
            Self::I16 => 3,
            Self::I24 => 5,
            Self::I32 => 6,
            Self::F32 => 7,
            Self::U8 => 9,
            Self::I8 => 10,
        }
    }

    pub(crate) const fn to_bits(self) -> u8 {
        match self {
            Self::U8 => 0,
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I24 => 3,
            Self::I32 => 4,
            Self::F32 => 5,
        }
    }

    pub(crate) const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::U8,
            1 => Self::I8,
            2 => Self::I16,
            3 => Self::I24,
            4 => Self::I32,
            _ => Self::F32,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "IQ uint8",
            Self::I8 => "IQ int8",
            Self::I16 => "IQ int16",
            Self::I24 => "IQ int24",
            Self::I32 => "IQ int32",
            Self::F32 => "IQ float32",
        };
        f.write_str(name)
    }
}

/// A set of [`SampleFormat`]s, stored as a bitmask.
///
/// # Example
///
/// ```
/// use extio_stream::{FormatSet, SampleFormat};
///
/// let set = FormatSet::from([SampleFormat::I16, SampleFormat::I32]);
/// assert!(set.contains(SampleFormat::I16));
/// assert!(!set.contains(SampleFormat::F32));
/// assert_eq!(set.widest(), Some(SampleFormat::I32));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FormatSet(u8);

impl FormatSet {
    /// The empty set.
    pub const EMPTY: FormatSet = FormatSet(0);

    /// Every format the crate understands.
    pub const ALL: FormatSet = FormatSet(0b0011_1111);

    /// A set containing a single format.
    #[must_use]
    pub const fn single(format: SampleFormat) -> Self {
        Self(1 << format.to_bits())
    }

    /// Returns a copy of this set with `format` added.
    #[must_use]
    pub const fn with(self, format: SampleFormat) -> Self {
        Self(self.0 | (1 << format.to_bits()))
    }

    /// Returns `true` if `format` is in the set.
    #[must_use]
    pub const fn contains(self, format: SampleFormat) -> bool {
        self.0 & (1 << format.to_bits()) != 0
    }

    /// Returns `true` if no format is in the set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the formats in the set, narrowest first.
    pub fn iter(self) -> impl Iterator<Item = SampleFormat> {
        SampleFormat::ALL
            .into_iter()
            .filter(move |f| self.contains(*f))
    }

    /// The format with the largest pair size, used to size ring slots.
    #[must_use]
    pub fn widest(self) -> Option<SampleFormat> {
        self.iter().max_by_key(|f| f.bytes_per_pair())
    }

    pub(crate) const fn bits(self) -> u8 {
        self.0
    }

    pub(crate) const fn from_raw(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }
}

impl<const N: usize> From<[SampleFormat; N]> for FormatSet {
    fn from(formats: [SampleFormat; N]) -> Self {
        formats.into_iter().collect()
    }
}

impl FromIterator<SampleFormat> for FormatSet {
    fn from_iter<I: IntoIterator<Item = SampleFormat>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}
