//! One-bit to multibit decimation.
//!
//! A symmetric windowed-sinc low-pass runs over the one-bit stream and is
//! evaluated once per `decimation` input samples. Per-byte lookup tables
//! fold the ±1 mapping and eight taps into one table read, so an output
//! sample costs one add per history byte. Quality tiers trade filter
//! length and arithmetic width.

use crate::error::PipelineError;
use crate::options::PcmQuality;

/// Decimating low-pass over canonical one-bit input.
pub struct Dsd2Pcm {
    channels: usize,
    /// Input samples consumed per output sample; a multiple of 8.
    decimation: usize,
    /// Whether to accumulate in f64 (High) or f32 (Fast/Normal).
    wide: bool,
    /// lut[lane][byte]: contribution of one history byte, lane 0 newest.
    lut: Vec<[f64; 256]>,
    /// Per-channel history of input bytes, newest first.
    history: Vec<Vec<u8>>,
    /// Per-channel count of bytes pending since the last output.
    pending: Vec<usize>,
}

impl Dsd2Pcm {
    pub fn new(
        channels: u32,
        decimation: u32,
        quality: PcmQuality,
    ) -> Result<Self, PipelineError> {
        if channels == 0 || channels > 6 {
            return Err(PipelineError::invalid_arg("unsupported channel count"));
        }
        if decimation == 0 || decimation % 8 != 0 {
            return Err(PipelineError::invalid_arg(
                "decimation ratio must be a positive multiple of 8",
            ));
        }

        let taps_per_output = match quality {
            PcmQuality::Fast => 4,
            PcmQuality::Normal => 8,
            PcmQuality::High => 16,
        };
        let tap_count = taps_per_output * decimation as usize;
        let taps = design_lowpass(tap_count, 0.45 / decimation as f64);
        let lanes = tap_count.div_ceil(8);

        let mut lut = vec![[0.0f64; 256]; lanes];
        for (lane, table) in lut.iter_mut().enumerate() {
            for (byte, slot) in table.iter_mut().enumerate() {
                let mut sum = 0.0;
                for bit in 0..8 {
                    let tap = lane * 8 + bit;
                    if tap >= tap_count {
                        break;
                    }
                    if (byte >> bit) & 1 == 1 {
                        sum += taps[tap];
                    } else {
                        sum -= taps[tap];
                    }
                }
                *slot = sum;
            }
        }

        Ok(Dsd2Pcm {
            channels: channels as usize,
            decimation: decimation as usize,
            wide: quality == PcmQuality::High,
            lut,
            history: vec![vec![0u8; lanes]; channels as usize],
            pending: vec![0; channels as usize],
        })
    }

    /// Input samples per output sample.
    pub fn decimation(&self) -> u32 {
        self.decimation as u32
    }

    /// Feed canonical channel-interleaved bytes; returns interleaved f64
    /// samples. Every `decimation` input bits per channel yield exactly
    /// one output sample per channel.
    pub fn push_bytes(&mut self, input: &[u8]) -> Vec<f64> {
        let bytes_per_output = self.decimation / 8;
        let mut out = Vec::new();
        for (i, &byte) in input.iter().enumerate() {
            let ch = i % self.channels;
            let history = &mut self.history[ch];
            // Newest-first shift register of input bytes.
            history.rotate_right(1);
            history[0] = byte;

            self.pending[ch] += 1;
            if self.pending[ch] == bytes_per_output {
                self.pending[ch] = 0;
                let sample = if self.wide {
                    let mut acc = 0.0f64;
                    for (lane, &b) in history.iter().enumerate() {
                        acc += self.lut[lane][b as usize];
                    }
                    acc
                } else {
                    let mut acc = 0.0f32;
                    for (lane, &b) in history.iter().enumerate() {
                        acc += self.lut[lane][b as usize] as f32;
                    }
                    acc as f64
                };
                out.push(sample);
            }
        }
        out
    }

    /// Drop all history; the next track starts from silence.
    pub fn reset(&mut self) {
        for history in &mut self.history {
            history.fill(0);
        }
        self.pending.fill(0);
    }
}

/// Blackman-windowed sinc, normalised to unit DC gain.
fn design_lowpass(tap_count: usize, cutoff: f64) -> Vec<f64> {
    let centre = (tap_count - 1) as f64 / 2.0;
    let mut taps: Vec<f64> = (0..tap_count)
        .map(|k| {
            let t = k as f64 - centre;
            let sinc = if t == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * std::f64::consts::PI * cutoff * t).sin() / (std::f64::consts::PI * t)
            };
            let phase = k as f64 / (tap_count - 1) as f64;
            let window = 0.42 - 0.5 * (2.0 * std::f64::consts::PI * phase).cos()
                + 0.08 * (4.0 * std::f64::consts::PI * phase).cos();
            sinc * window
        })
        .collect();
    let gain: f64 = taps.iter().sum();
    for tap in &mut taps {
        *tap /= gain;
    }
    taps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_count_matches_the_ratio() {
        let mut filter = Dsd2Pcm::new(2, 32, PcmQuality::Normal).unwrap();
        // 32 bytes interleaved = 16 bytes/channel = 128 bits/channel.
        let out = filter.push_bytes(&vec![0x55u8; 32]);
        assert_eq!(out.len(), (128 / 32) * 2);
    }

    #[test]
    fn all_ones_converges_to_full_scale() {
        let mut filter = Dsd2Pcm::new(1, 32, PcmQuality::High).unwrap();
        // Long run of all-ones one-bit input: the filter output must
        // converge to +1 once the history fills.
        let mut last = 0.0;
        for _ in 0..64 {
            for sample in filter.push_bytes(&[0xFF; 4]) {
                last = sample;
            }
        }
        assert!((last - 1.0).abs() < 1e-6, "converged to {last}");
    }

    #[test]
    fn alternating_input_stays_near_zero() {
        let mut filter = Dsd2Pcm::new(1, 32, PcmQuality::High).unwrap();
        let mut last = f64::MAX;
        for _ in 0..64 {
            for sample in filter.push_bytes(&[0xAA; 4]) {
                last = sample;
            }
        }
        assert!(last.abs() < 0.01, "settled at {last}");
    }

    #[test]
    fn reset_restarts_from_silence() {
        let mut filter = Dsd2Pcm::new(1, 32, PcmQuality::Fast).unwrap();
        let first = filter.push_bytes(&[0xFF; 8]);
        filter.reset();
        let second = filter.push_bytes(&[0xFF; 8]);
        assert_eq!(first, second);
    }

    #[test]
    fn bad_ratios_are_rejected() {
        assert!(Dsd2Pcm::new(2, 0, PcmQuality::Normal).is_err());
        assert!(Dsd2Pcm::new(2, 12, PcmQuality::Normal).is_err());
        assert!(Dsd2Pcm::new(0, 32, PcmQuality::Normal).is_err());
    }
}
