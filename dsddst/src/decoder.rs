use tracing::trace;

use crate::ac::ArithmeticCoder;
use crate::bitreader::BitReader;
use crate::tables::{read_element_map, read_filter_tables, read_probability_tables};
use crate::DstError;

/// Sliding status lanes per channel: 128 bits of one-bit history.
const STATUS_LANES: usize = 16;

/// Frame geometry shared by every frame of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    pub channels: u32,
    pub sample_rate: u32,
}

impl FrameConfig {
    pub fn validate(&self) -> Result<(), DstError> {
        if self.channels == 0 || self.channels > 6 {
            return Err(DstError::InvalidArg("channel count must be 1..=6"));
        }
        if self.sample_rate == 0 || self.sample_rate % 44_100 != 0 {
            return Err(DstError::InvalidArg(
                "sample rate must be a 44.1 kHz multiple",
            ));
        }
        Ok(())
    }

    /// Samples per channel produced by one frame.
    pub fn samples_per_frame(&self) -> usize {
        588 * (self.sample_rate / 44_100) as usize
    }

    /// Bytes in one decoded frame across all channels.
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() / 8 * self.channels as usize
    }
}

/// Decoder for one coded stream. Stateless across frames; the struct only
/// caches its configuration and reusable scratch space.
pub struct DstDecoder {
    config: FrameConfig,
    /// Per-element lookup: lane and byte value to partial prediction.
    lookup: Vec<[[i16; 256]; STATUS_LANES]>,
}

impl DstDecoder {
    pub fn new(config: FrameConfig) -> Result<Self, DstError> {
        config.validate()?;
        Ok(DstDecoder {
            config,
            lookup: Vec::new(),
        })
    }

    pub fn config(&self) -> FrameConfig {
        self.config
    }

    /// Decode one coded frame into canonical one-bit bytes.
    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, DstError> {
        if frame.is_empty() {
            return Err(DstError::UnexpectedEof);
        }
        let channels = self.config.channels as usize;
        let samples = self.config.samples_per_frame();
        let out_len = self.config.frame_bytes();

        let mut reader = BitReader::new(frame);
        if reader.read_bit()? == 0 {
            // Uncompressed passthrough: 7 reserved-zero bits, then the raw
            // frame body.
            if reader.read_bits(7)? != 0 {
                return Err(DstError::InvalidData("reserved passthrough bits set"));
            }
            if frame.len() - 1 != out_len {
                return Err(DstError::InvalidData("passthrough frame size mismatch"));
            }
            return Ok(frame[1..].to_vec());
        }

        // Segmentation: the decoder only implements "same for the whole
        // frame" on all three predicates.
        for _ in 0..3 {
            if reader.read_bit()? != 1 {
                return Err(DstError::NotImplemented);
            }
        }

        let max_elements = 2 * channels;
        let filter_map = read_element_map(&mut reader, channels, max_elements)?;
        let prob_map = if reader.read_bit()? == 1 {
            filter_map.clone()
        } else {
            read_element_map(&mut reader, channels, max_elements)?
        };
        let filter_count = filter_map.iter().max().copied().unwrap_or(0) + 1;
        let prob_count = prob_map.iter().max().copied().unwrap_or(0) + 1;

        let mut half_probability = [false; 6];
        for flag in half_probability.iter_mut().take(channels) {
            *flag = reader.read_bit()? == 1;
        }

        let filters = read_filter_tables(&mut reader, filter_count)?;
        let probabilities = read_probability_tables(&mut reader, prob_count)?;

        let mut coder = ArithmeticCoder::init(&mut reader);
        self.build_lookup(&filters)?;

        // One leading bit primes the coder against a probability derived
        // from the first filter coefficient.
        let prime = reverse_7lsbs(filters[0].coefficients[0]).max(1);
        let _ = coder.decode_bit(prime, &mut reader);

        let mut status = [[0xAAu8; STATUS_LANES]; 6];
        let mut output = vec![0u8; out_len];

        for i in 0..samples {
            for ch in 0..channels {
                let element = filter_map[ch];
                let lut = &self.lookup[element];
                let lanes = &status[ch];
                let mut predict = 0i32;
                for lane in 0..STATUS_LANES {
                    predict += lut[lane][lanes[lane] as usize] as i32;
                }
                // The prediction lives in a 16-bit register; the lane sum
                // wraps rather than saturates.
                let predict = predict as i16 as i32;

                let filter_len = filters[element].coefficients.len();
                let p = if half_probability[ch] && i < filter_len {
                    128
                } else {
                    let table = &probabilities[prob_map[ch]].values;
                    let index = ((predict.unsigned_abs() >> 3) as usize).min(table.len() - 1);
                    table[index]
                };

                let residual = coder.decode_bit(p, &mut reader);
                let bit = (((predict >> 15) & 1) as u32 ^ residual) as u8;

                output[(i / 8) * channels + ch] |= bit << (7 - (i % 8));

                let lanes = &mut status[ch];
                for lane in (1..STATUS_LANES).rev() {
                    lanes[lane] = (lanes[lane] << 1) | (lanes[lane - 1] >> 7);
                }
                lanes[0] = (lanes[0] << 1) | bit;
            }
        }

        trace!(frame_len = frame.len(), out_len, "decoded coded frame");
        Ok(output)
    }

    /// Materialise the per-element lane lookup. Every entry is the partial
    /// prediction contributed by one history byte; each must fit 16 bits.
    fn build_lookup(
        &mut self,
        filters: &[crate::tables::FilterTable],
    ) -> Result<(), DstError> {
        self.lookup.clear();
        for filter in filters {
            let mut element = [[0i16; 256]; STATUS_LANES];
            for (lane, row) in element.iter_mut().enumerate() {
                for (byte, slot) in row.iter_mut().enumerate() {
                    let mut sum = 0i32;
                    for bit in 0..8 {
                        let tap = lane * 8 + bit;
                        if tap >= filter.coefficients.len() {
                            break;
                        }
                        let coefficient = filter.coefficients[tap] as i32;
                        if (byte >> bit) & 1 == 1 {
                            sum += coefficient;
                        } else {
                            sum -= coefficient;
                        }
                    }
                    if sum < i16::MIN as i32 || sum > i16::MAX as i32 {
                        return Err(DstError::InvalidData(
                            "filter lookup overflows 16 bits",
                        ));
                    }
                    *slot = sum as i16;
                }
            }
            self.lookup.push(element);
        }
        Ok(())
    }
}

/// Reverse the low 7 bits of a coefficient, the conventional derivation of
/// the priming probability.
fn reverse_7lsbs(value: i16) -> u32 {
    let v = (value as u32) & 0x7F;
    let mut out = 0u32;
    for i in 0..7 {
        out |= ((v >> i) & 1) << (6 - i);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testbits::BitWriter;

    fn config() -> FrameConfig {
        FrameConfig {
            channels: 1,
            sample_rate: 2_822_400,
        }
    }

    #[test]
    fn config_rejects_bad_geometry() {
        assert!(FrameConfig {
            channels: 0,
            sample_rate: 2_822_400
        }
        .validate()
        .is_err());
        assert!(FrameConfig {
            channels: 7,
            sample_rate: 2_822_400
        }
        .validate()
        .is_err());
        assert!(FrameConfig {
            channels: 2,
            sample_rate: 48_000
        }
        .validate()
        .is_err());
        assert_eq!(config().samples_per_frame(), 37_632);
        assert_eq!(config().frame_bytes(), 4_704);
    }

    #[test]
    fn passthrough_frames_copy_the_body() {
        let mut decoder = DstDecoder::new(config()).unwrap();
        let body: Vec<u8> = (0..4_704u32).map(|i| (i % 256) as u8).collect();
        let mut frame = vec![0u8];
        frame.extend_from_slice(&body);
        assert_eq!(decoder.decode(&frame).unwrap(), body);
    }

    #[test]
    fn passthrough_rejects_reserved_bits_and_bad_sizes() {
        let mut decoder = DstDecoder::new(config()).unwrap();
        let mut frame = vec![0x40u8];
        frame.extend_from_slice(&vec![0u8; 4_704]);
        assert!(matches!(
            decoder.decode(&frame),
            Err(DstError::InvalidData(_))
        ));

        let frame = vec![0u8; 100];
        assert!(matches!(
            decoder.decode(&frame),
            Err(DstError::InvalidData(_))
        ));
    }

    #[test]
    fn unsupported_segmentation_is_not_implemented() {
        let mut decoder = DstDecoder::new(config()).unwrap();
        let mut writer = BitWriter::new();
        writer.push_bit(1); // coded
        writer.push_bit(1);
        writer.push_bit(0); // second predicate differs
        writer.push_bit(1);
        let frame = writer.finish();
        assert_eq!(decoder.decode(&frame), Err(DstError::NotImplemented));
    }

    fn coded_frame_header() -> BitWriter {
        let mut writer = BitWriter::new();
        writer.push_bit(1); // coded frame
        writer.push_bits(0b111, 3); // whole-frame segmentation
        // Mono: both element maps are implicit; share the filter map.
        writer.push_bit(1);
        writer.push_bit(0); // half-probability off
        // Filter table: length 8, raw taps.
        writer.push_bits(7, 7);
        writer.push_bit(0);
        for c in [5i32, -3, 2, -1, 1, 0, -2, 4] {
            writer.push_signed(c, 9);
        }
        // Probability table: length 4, raw values.
        writer.push_bits(3, 6);
        writer.push_bit(0);
        for p in [100u32, 60, 30, 10] {
            writer.push_bits(p, 7);
        }
        writer
    }

    #[test]
    fn coded_frames_decode_deterministically() {
        let mut writer = coded_frame_header();
        // Arithmetic-coder seed plus payload bits.
        for i in 0..2_000u32 {
            writer.push_bits(i.wrapping_mul(2_654_435_761) % 4096, 12);
        }
        let frame = writer.finish();

        let mut first = DstDecoder::new(config()).unwrap();
        let mut second = DstDecoder::new(config()).unwrap();
        let a = first.decode(&frame).unwrap();
        let b = second.decode(&frame).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4_704);
    }

    #[test]
    fn short_coded_frame_still_terminates() {
        // Once the payload runs out the coder shifts in zeros; the decode
        // must finish and stay deterministic.
        let frame = coded_frame_header().finish();
        let mut first = DstDecoder::new(config()).unwrap();
        let mut second = DstDecoder::new(config()).unwrap();
        let a = first.decode(&frame);
        let b = second.decode(&frame);
        assert_eq!(a, b);
        assert!(a.is_ok());
    }

    #[test]
    fn max_length_filter_table_is_accepted() {
        let mut decoder = DstDecoder::new(config()).unwrap();
        let mut writer = BitWriter::new();
        writer.push_bit(1);
        writer.push_bits(0b111, 3);
        writer.push_bit(1); // shared map
        writer.push_bit(0); // half-probability off
        // 128 taps of -256: a single lane sums to -2048, fine; but all
        // lanes summed per byte still fit. Use raw table with max taps to
        // exercise the lookup bound instead via per-lane sum: 8 * 256 =
        // 2048 < i16::MAX, so the lookup itself cannot overflow with legal
        // 9-bit taps; the decoder must accept this table.
        writer.push_bits(127, 7);
        writer.push_bit(0);
        for _ in 0..128 {
            writer.push_signed(-256, 9);
        }
        writer.push_bits(0, 6); // probability table: length 1
        writer.push_bit(0);
        writer.push_bits(64, 7);
        for _ in 0..200 {
            writer.push_bits(0xABC, 12);
        }
        let frame = writer.finish();
        assert!(decoder.decode(&frame).is_ok());
    }
}
