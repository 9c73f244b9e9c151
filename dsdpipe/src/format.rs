//! Stream format descriptors shared by every node.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Payload variant carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioKind {
    /// Canonical one-bit audio: channel-interleaved bytes, MSB-first.
    OneBitRaw,
    /// Losslessly coded one-bit frames; the nominal rate names the
    /// underlying one-bit rate, not the coded frame rate.
    OneBitCompressed,
    PcmInt16,
    PcmInt24,
    PcmInt32,
    PcmFloat32,
    PcmFloat64,
}

impl AudioKind {
    pub fn is_one_bit(&self) -> bool {
        matches!(self, AudioKind::OneBitRaw | AudioKind::OneBitCompressed)
    }

    pub fn is_pcm(&self) -> bool {
        !self.is_one_bit()
    }

    /// Bytes per sample for the PCM variants.
    pub fn bytes_per_sample(&self) -> Option<usize> {
        match self {
            AudioKind::PcmInt16 => Some(2),
            AudioKind::PcmInt24 => Some(3),
            AudioKind::PcmInt32 | AudioKind::PcmFloat32 => Some(4),
            AudioKind::PcmFloat64 => Some(8),
            _ => None,
        }
    }
}

/// Channel layouts up to six channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Multi3,
    Multi4,
    Multi5,
    Multi6,
}

impl ChannelLayout {
    pub fn channel_count(&self) -> u32 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Multi3 => 3,
            ChannelLayout::Multi4 => 4,
            ChannelLayout::Multi5 => 5,
            ChannelLayout::Multi6 => 6,
        }
    }

    pub fn from_channel_count(channels: u32) -> Result<Self, PipelineError> {
        Ok(match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            3 => ChannelLayout::Multi3,
            4 => ChannelLayout::Multi4,
            5 => ChannelLayout::Multi5,
            6 => ChannelLayout::Multi6,
            other => {
                return Err(PipelineError::invalid_arg(format!(
                    "unsupported channel count {other}"
                )))
            }
        })
    }
}

/// One stream's format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub kind: AudioKind,
    pub sample_rate_hz: u32,
    pub channels: u32,
    pub layout: ChannelLayout,
}

impl AudioFormat {
    pub fn new(kind: AudioKind, sample_rate_hz: u32, channels: u32) -> Result<Self, PipelineError> {
        let layout = ChannelLayout::from_channel_count(channels)?;
        Ok(AudioFormat {
            kind,
            sample_rate_hz,
            channels,
            layout,
        })
    }

    /// Samples per channel in one 1/75-second frame of one-bit audio.
    pub fn samples_per_frame(&self) -> u64 {
        588 * (self.sample_rate_hz / 44_100) as u64
    }

    /// Canonical bytes in one one-bit frame across all channels.
    pub fn one_bit_frame_bytes(&self) -> u64 {
        self.samples_per_frame() / 8 * self.channels as u64
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.channels != self.layout.channel_count() {
            return Err(PipelineError::invalid_arg(
                "channel count disagrees with the channel layout",
            ));
        }
        if self.sample_rate_hz == 0 {
            return Err(PipelineError::invalid_arg("sample rate must be non-zero"));
        }
        if self.kind.is_one_bit() && self.sample_rate_hz % 44_100 != 0 {
            return Err(PipelineError::invalid_arg(
                "one-bit sample rate must be a 44.1 kHz multiple",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_and_count_stay_consistent() {
        let format = AudioFormat::new(AudioKind::OneBitRaw, 2_822_400, 2).unwrap();
        assert_eq!(format.layout, ChannelLayout::Stereo);
        assert!(format.validate().is_ok());
        assert_eq!(format.samples_per_frame(), 37_632);
        assert_eq!(format.one_bit_frame_bytes(), 9_408);

        assert!(AudioFormat::new(AudioKind::OneBitRaw, 2_822_400, 7).is_err());
    }

    #[test]
    fn mismatched_layout_is_rejected() {
        let mut format = AudioFormat::new(AudioKind::PcmInt16, 88_200, 2).unwrap();
        format.layout = ChannelLayout::Multi5;
        assert!(format.validate().is_err());
    }
}
