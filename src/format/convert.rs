//! Raw IQ byte conversion.

use super::SampleFormat;

/// Decodes a raw little-endian IQ payload into normalized `(i, q)` pairs.
///
/// Integer formats are scaled into [-1.0, 1.0); unsigned 8-bit is centred on
/// 128 first. Trailing bytes that do not form a whole pair are ignored.
///
/// # Example
///
/// ```
/// use extio_stream::{format::iq_to_f32, SampleFormat};
///
/// let raw = [0x00, 0x40, 0x00, 0xC0]; // I = 16384, Q = -16384
/// let pairs = iq_to_f32(&raw, SampleFormat::I16);
/// assert_eq!(pairs, vec![(0.5, -0.5)]);
/// ```
pub fn iq_to_f32(raw: &[u8], format: SampleFormat) -> Vec<(f32, f32)> {
    let width = format.bytes_per_sample();
    raw.chunks_exact(format.bytes_per_pair())
        .map(|pair| {
            let (i, q) = pair.split_at(width);
            (decode_sample(i, format), decode_sample(q, format))
        })
        .collect()
}

#[inline]
fn decode_sample(b: &[u8], format: SampleFormat) -> f32 {
    match format {
        SampleFormat::U8 => (f32::from(b[0]) - 128.0) / 128.0,
        SampleFormat::I8 => f32::from(b[0] as i8) / 128.0,
        SampleFormat::I16 => f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0,
        SampleFormat::I24 => {
            // Sign-extend by placing the 24 bits in the top of an i32
            let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
            v as f32 / 8_388_608.0
        }
        SampleFormat::I32 => {
            i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0
        }
        SampleFormat::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
    }
}

/// Converts signed 8-bit samples to the offset-binary encoding WAV expects
/// for 8-bit PCM.
pub fn offset_binary_i8(raw: &[u8]) -> Vec<u8> {
    raw.iter().map(|&b| b ^ 0x80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_centre_is_zero() {
        let pairs = iq_to_f32(&[128, 0], SampleFormat::U8);
        assert_eq!(pairs, vec![(0.0, -1.0)]);
    }

    #[test]
    fn test_i8_scaling() {
        let pairs = iq_to_f32(&[64, 0xC0], SampleFormat::I8);
        assert_eq!(pairs, vec![(0.5, -0.5)]);
    }

    #[test]
    fn test_i24_sign_extension() {
        // I = -1, Q = 0x400000 (half scale)
        let raw = [0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x40];
        let pairs = iq_to_f32(&raw, SampleFormat::I24);
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].0 < 0.0 && pairs[0].0 > -0.001);
        assert_eq!(pairs[0].1, 0.5);
    }

    #[test]
    fn test_i32_scaling() {
        let raw = [0, 0, 0, 0x40, 0, 0, 0, 0x80];
        assert_eq!(iq_to_f32(&raw, SampleFormat::I32), vec![(0.5, -1.0)]);
    }

    #[test]
    fn test_f32_passthrough() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&0.25f32.to_le_bytes());
        raw.extend_from_slice(&(-0.75f32).to_le_bytes());
        assert_eq!(iq_to_f32(&raw, SampleFormat::F32), vec![(0.25, -0.75)]);
    }

    #[test]
    fn test_partial_pair_ignored() {
        let raw = [0, 0, 0, 0, 1];
        assert_eq!(iq_to_f32(&raw, SampleFormat::I16).len(), 1);
    }

    #[test]
    fn test_offset_binary() {
        assert_eq!(offset_binary_i8(&[0x00, 0x7F, 0x80, 0xFF]), vec![0x80, 0xFF, 0x00, 0x7F]);
    }
}
