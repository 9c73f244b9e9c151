//! Float to integer/float conversion at the sink boundary.
//!
//! Samples are clamped to [-1, 1] first; integer conversion scales by
//! `2^(bits-1) - 1` and rounds to nearest with ties away from zero
//! (which is what `f64::round` does).

/// Reinterpret a little-endian f64 payload as samples.
pub fn payload_to_f64(payload: &[u8]) -> Vec<f64> {
    payload
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[inline]
fn quantise(sample: f64, scale: f64) -> i64 {
    (sample.clamp(-1.0, 1.0) * scale).round() as i64
}

pub fn f64_to_i16_bytes(samples: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&(quantise(sample, 32767.0) as i16).to_le_bytes());
    }
    out
}

/// Packed 24-bit little-endian.
pub fn f64_to_i24_bytes(samples: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 3);
    for &sample in samples {
        let value = quantise(sample, 8_388_607.0) as i32;
        out.extend_from_slice(&value.to_le_bytes()[..3]);
    }
    out
}

pub fn f64_to_i32_bytes(samples: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for &sample in samples {
        out.extend_from_slice(&(quantise(sample, 2_147_483_647.0) as i32).to_le_bytes());
    }
    out
}

pub fn f64_to_f32_bytes(samples: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for &sample in samples {
        out.extend_from_slice(&(sample.clamp(-1.0, 1.0) as f32).to_le_bytes());
    }
    out
}

/// Integer samples for the FLAC encoder, at a given bit depth.
pub fn f64_to_i32_samples(samples: &[f64], bits: u32) -> Vec<i32> {
    let scale = ((1i64 << (bits - 1)) - 1) as f64;
    samples
        .iter()
        .map(|&sample| quantise(sample, scale) as i32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_bounds_the_output() {
        assert_eq!(f64_to_i16_bytes(&[2.0]), 32767i16.to_le_bytes());
        assert_eq!(f64_to_i16_bytes(&[-2.0]), (-32767i16).to_le_bytes());
    }

    #[test]
    fn ties_round_away_from_zero() {
        // 0.5 * 5.0 == 2.5 exactly in binary floating point.
        assert_eq!(quantise(0.5, 5.0), 3);
        assert_eq!(quantise(-0.5, 5.0), -3);
    }

    #[test]
    fn i24_packs_three_bytes() {
        let bytes = f64_to_i24_bytes(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes.len(), 9);
        assert_eq!(&bytes[0..3], &[0xFF, 0xFF, 0x7F]); // 8388607
        assert_eq!(&bytes[3..6], &[0x01, 0x00, 0x80]); // -8388607
        assert_eq!(&bytes[6..9], &[0x00, 0x00, 0x00]);
    }

    #[test]
    fn f64_payload_round_trips() {
        let samples = [0.25f64, -0.5, 1.0];
        let mut payload = Vec::new();
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        assert_eq!(payload_to_f64(&payload), samples);
    }

    #[test]
    fn flac_samples_scale_to_the_requested_depth() {
        assert_eq!(f64_to_i32_samples(&[1.0], 16), vec![32767]);
        assert_eq!(f64_to_i32_samples(&[-1.0], 24), vec![-8_388_607]);
    }
}
