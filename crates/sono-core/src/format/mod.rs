//! Sample format conversion
//!
//! Stateless converters between fixed-point sample encodings and the
//! internal `f32` representation, in both directions. Every stream and the
//! WAV loader decode through here; the engine encodes its mixed output for
//! the sink through here.

use crate::types::SampleFormat;

/// Scale factors for the fixed-point encodings
const I8_SCALE: f32 = 1.0 / 0x80 as f32;
const I16_SCALE: f32 = 1.0 / 0x8000 as f32;
const I24_SCALE: f32 = 1.0 / 0x80_0000 as f32;
const I32_SCALE: f32 = 1.0 / 0x8000_0000u32 as f32;

/// Decode encoded samples into `f32`.
///
/// Converts as many whole samples as fit in both slices and returns the
/// sample count. Trailing partial bytes in `input` are ignored.
pub fn to_float(format: SampleFormat, input: &[u8], output: &mut [f32]) -> usize {
    let bps = format.bytes_per_sample();
    let count = (input.len() / bps).min(output.len());

    for (i, out) in output.iter_mut().enumerate().take(count) {
        let b = &input[i * bps..(i + 1) * bps];
        *out = match format {
            SampleFormat::U8 => (b[0] as f32 - 128.0) * I8_SCALE,
            SampleFormat::S8 => b[0] as i8 as f32 * I8_SCALE,
            SampleFormat::S16LE => i16::from_le_bytes([b[0], b[1]]) as f32 * I16_SCALE,
            SampleFormat::S16BE => i16::from_be_bytes([b[0], b[1]]) as f32 * I16_SCALE,
            SampleFormat::S24LE3 => {
                // Sign-extend the packed 24-bit value
                let v = (b[0] as i32) | ((b[1] as i32) << 8) | ((b[2] as i8 as i32) << 16);
                v as f32 * I24_SCALE
            }
            SampleFormat::S24NE4 => {
                let v = i32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
                // 24-bit payload in the low 3 bytes, sign-extended via shifts
                ((v << 8) >> 8) as f32 * I24_SCALE
            }
            SampleFormat::S32LE => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 * I32_SCALE,
            SampleFormat::S32BE => i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f32 * I32_SCALE,
            SampleFormat::F32 => f32::from_ne_bytes([b[0], b[1], b[2], b[3]]),
            SampleFormat::F64 => {
                f64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            }
        };
    }
    count
}

/// Encode `f32` samples into the target format.
///
/// Input is clamped to [-1.0, 1.0] before scaling. Converts as many samples
/// as fit in both slices and returns the number of bytes written.
pub fn from_float(format: SampleFormat, input: &[f32], output: &mut [u8]) -> usize {
    let bps = format.bytes_per_sample();
    let count = input.len().min(output.len() / bps);

    for (i, &sample) in input.iter().enumerate().take(count) {
        let s = sample.clamp(-1.0, 1.0);
        let b = &mut output[i * bps..(i + 1) * bps];
        // Quantize with the same power-of-two scale the decoders divide by,
        // clamping +1.0 to the representable maximum, so decode inverts
        // encode within half an LSB.
        match format {
            SampleFormat::U8 => b[0] = (quantize(s, 128.0) + 128) as u8,
            SampleFormat::S8 => b[0] = quantize(s, 128.0) as i8 as u8,
            SampleFormat::S16LE => {
                b.copy_from_slice(&(quantize(s, 32768.0) as i16).to_le_bytes())
            }
            SampleFormat::S16BE => {
                b.copy_from_slice(&(quantize(s, 32768.0) as i16).to_be_bytes())
            }
            SampleFormat::S24LE3 => {
                let v = quantize(s, 8_388_608.0);
                b[0] = v as u8;
                b[1] = (v >> 8) as u8;
                b[2] = (v >> 16) as u8;
            }
            SampleFormat::S24NE4 => {
                let v = quantize(s, 8_388_608.0) & 0x00FF_FFFF;
                b.copy_from_slice(&v.to_ne_bytes());
            }
            SampleFormat::S32LE => {
                b.copy_from_slice(&quantize32(s).to_le_bytes())
            }
            SampleFormat::S32BE => {
                b.copy_from_slice(&quantize32(s).to_be_bytes())
            }
            SampleFormat::F32 => b.copy_from_slice(&s.to_ne_bytes()),
            SampleFormat::F64 => b.copy_from_slice(&(s as f64).to_ne_bytes()),
        }
    }
    count * bps
}

fn quantize(s: f32, scale: f32) -> i32 {
    let max = scale as i32 - 1;
    ((s * scale).round() as i32).clamp(-(max + 1), max)
}

fn quantize32(s: f32) -> i32 {
    let v = (s as f64 * 2_147_483_648.0).round();
    v.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16le_decode() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0xC0]; // 0, +0.5, -0.5
        let mut out = [0.0f32; 3];
        assert_eq!(to_float(SampleFormat::S16LE, &bytes, &mut out), 3);
        assert!((out[0]).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-4);
        assert!((out[2] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_u8_center_is_silence() {
        let mut out = [1.0f32; 1];
        to_float(SampleFormat::U8, &[128], &mut out);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_s24_sign_extension() {
        // -1 in packed 24-bit little-endian
        let mut out = [0.0f32; 1];
        to_float(SampleFormat::S24LE3, &[0xFF, 0xFF, 0xFF], &mut out);
        assert!((out[0] + I24_SCALE).abs() < 1e-9);
    }

    #[test]
    fn test_s16_roundtrip() {
        let samples = [-1.0f32, -0.25, 0.0, 0.25, 0.999];
        let mut bytes = [0u8; 10];
        assert_eq!(from_float(SampleFormat::S16LE, &samples, &mut bytes), 10);
        let mut back = [0.0f32; 5];
        to_float(SampleFormat::S16LE, &bytes, &mut back);
        for (a, b) in samples.iter().zip(back.iter()) {
            // Symmetric scaling keeps the error within half an LSB
            assert!((a - b).abs() <= 0.5 / 32768.0, "{} vs {}", a, b);
        }
        // Exactly representable values survive untouched
        assert_eq!(back[0], -1.0);
        assert_eq!(back[1], -0.25);
        assert_eq!(back[2], 0.0);
    }

    #[test]
    fn test_clamps_out_of_range() {
        let mut bytes = [0u8; 2];
        from_float(SampleFormat::S16LE, &[2.5], &mut bytes);
        assert_eq!(i16::from_le_bytes(bytes), 32767);
    }

    #[test]
    fn test_partial_input_ignored() {
        // 3 bytes is one and a half S16 samples
        let mut out = [0.0f32; 4];
        assert_eq!(to_float(SampleFormat::S16LE, &[0, 0, 0], &mut out), 1);
    }
}
