//! Decompressor transform: coded frames in, raw one-bit frames out.

use async_trait::async_trait;

use dsddst::{DstDecoder, FrameConfig};

use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::nodes::FrameTransform;

/// Wraps the frame decoder as a 1:1 transform. Frames are independent,
/// so there is nothing to flush at track boundaries.
pub struct DstDecompressor {
    decoder: DstDecoder,
    output: AudioFormat,
}

impl DstDecompressor {
    pub fn new(input: &AudioFormat) -> Result<Self, PipelineError> {
        if input.kind != AudioKind::OneBitCompressed {
            return Err(PipelineError::invalid_arg(
                "decompressor input must be compressed one-bit audio",
            ));
        }
        let decoder = DstDecoder::new(FrameConfig {
            channels: input.channels,
            sample_rate: input.sample_rate_hz,
        })?;
        let output = AudioFormat {
            kind: AudioKind::OneBitRaw,
            ..*input
        };
        Ok(DstDecompressor { decoder, output })
    }
}

#[async_trait]
impl FrameTransform for DstDecompressor {
    fn output_format(&self, _input: &AudioFormat) -> AudioFormat {
        self.output
    }

    async fn process(&mut self, frame: &Frame) -> Result<Vec<Frame>, PipelineError> {
        let decoded = self.decoder.decode(&frame.payload)?;
        Ok(vec![Frame::new(self.output, frame.seq, decoded)])
    }

    async fn flush(&mut self) -> Result<Vec<Frame>, PipelineError> {
        Ok(Vec::new())
    }
}
