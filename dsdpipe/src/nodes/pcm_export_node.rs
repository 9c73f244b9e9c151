//! One-bit to multibit export transform.
//!
//! Always emits 64-bit float frames; sinks convert to their configured
//! word size. Stateful across frames (the filter carries history), so the
//! coordinator flushes it at every track boundary.

use async_trait::async_trait;

use crate::dsp::Dsd2Pcm;
use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::nodes::FrameTransform;
use crate::options::PcmQuality;

pub struct PcmExport {
    filter: Dsd2Pcm,
    output: AudioFormat,
    seq: u64,
}

impl PcmExport {
    /// `target_rate` of zero means auto: `source_rate / 32`.
    pub fn new(
        input: &AudioFormat,
        target_rate: u32,
        quality: PcmQuality,
    ) -> Result<Self, PipelineError> {
        if input.kind != AudioKind::OneBitRaw {
            return Err(PipelineError::invalid_arg(
                "PCM export input must be raw one-bit audio",
            ));
        }
        let out_rate = if target_rate == 0 {
            input.sample_rate_hz / 32
        } else {
            target_rate
        };
        if out_rate == 0 || input.sample_rate_hz % out_rate != 0 {
            return Err(PipelineError::invalid_arg(
                "PCM rate must divide the one-bit rate",
            ));
        }
        let decimation = input.sample_rate_hz / out_rate;
        let filter = Dsd2Pcm::new(input.channels, decimation, quality)?;
        let output = AudioFormat {
            kind: AudioKind::PcmFloat64,
            sample_rate_hz: out_rate,
            ..*input
        };
        Ok(PcmExport {
            filter,
            output,
            seq: 0,
        })
    }
}

#[async_trait]
impl FrameTransform for PcmExport {
    fn output_format(&self, _input: &AudioFormat) -> AudioFormat {
        self.output
    }

    async fn process(&mut self, frame: &Frame) -> Result<Vec<Frame>, PipelineError> {
        let samples = self.filter.push_bytes(&frame.payload);
        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let mut payload = Vec::with_capacity(samples.len() * 8);
        for sample in samples {
            payload.extend_from_slice(&sample.to_le_bytes());
        }
        let out = Frame::new(self.output, self.seq, payload);
        self.seq += 1;
        Ok(vec![out])
    }

    async fn flush(&mut self) -> Result<Vec<Frame>, PipelineError> {
        // Track boundary: restart from silence with fresh numbering.
        self.filter.reset();
        self.seq = 0;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::payload_to_f64;

    fn raw_format() -> AudioFormat {
        AudioFormat::new(AudioKind::OneBitRaw, 2_822_400, 2).unwrap()
    }

    #[tokio::test]
    async fn one_frame_yields_the_exact_sample_count() {
        let format = raw_format();
        let mut export = PcmExport::new(&format, 88_200, PcmQuality::Fast).unwrap();
        assert_eq!(export.output_format(&format).sample_rate_hz, 88_200);

        // One 1/75 s frame: 37632 samples/channel -> 1176 PCM samples/channel.
        let frame = Frame::new(format, 0, vec![0x69u8; 9_408]);
        let out = export.process(&frame).await.unwrap();
        assert_eq!(out.len(), 1);
        let samples = payload_to_f64(&out[0].payload);
        assert_eq!(samples.len(), 1_176 * 2);
    }

    #[tokio::test]
    async fn auto_rate_divides_by_32() {
        let format = raw_format();
        let export = PcmExport::new(&format, 0, PcmQuality::Normal).unwrap();
        assert_eq!(export.output_format(&format).sample_rate_hz, 88_200);
    }

    #[tokio::test]
    async fn indivisible_rates_are_rejected() {
        let format = raw_format();
        assert!(PcmExport::new(&format, 96_000, PcmQuality::Normal).is_err());
    }

    #[tokio::test]
    async fn flush_restarts_numbering_and_state() {
        let format = raw_format();
        let mut export = PcmExport::new(&format, 88_200, PcmQuality::Fast).unwrap();
        let frame = Frame::new(format, 0, vec![0xFFu8; 9_408]);

        let first = export.process(&frame).await.unwrap();
        export.flush().await.unwrap();
        let second = export.process(&frame).await.unwrap();

        assert_eq!(first[0].seq, second[0].seq);
        assert_eq!(first[0].payload, second[0].payload);
    }
}
