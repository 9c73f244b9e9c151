//! Run-time configuration of a pipeline.

use serde::{Deserialize, Serialize};

/// PCM word size produced for PCM sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PcmBitDepth {
    B16,
    #[default]
    B24,
    /// 32 bits; float for the WAV sink. The FLAC sink coerces this to 24
    /// with a warning at configure time.
    B32,
}

impl PcmBitDepth {
    pub fn bits(&self) -> u32 {
        match self {
            PcmBitDepth::B16 => 16,
            PcmBitDepth::B24 => 24,
            PcmBitDepth::B32 => 32,
        }
    }
}

/// Resampler quality tier; selects filter length and arithmetic width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PcmQuality {
    Fast,
    #[default]
    Normal,
    High,
}

/// Shape of per-track output filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackFilenamePolicy {
    NumberOnly,
    #[default]
    NumberTitle,
    NumberArtistTitle,
}

/// Shape of the album output directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlbumDirPolicy {
    #[default]
    TitleOnly,
    ArtistTitle,
}

/// Which channel area a disc-image source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelArea {
    #[default]
    Stereo,
    Multichannel,
}

/// The enumerated options a run consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub pcm_bit_depth: PcmBitDepth,
    /// Target PCM rate in Hz; 0 means auto (`source_rate / 32`). The auto
    /// heuristic is kept even though it over-decimates exotic high-rate
    /// sources; callers wanting something else say so explicitly.
    pub pcm_sample_rate: u32,
    pub pcm_quality: PcmQuality,
    /// FLAC effort, 0..=8.
    pub flac_compression: u32,
    pub write_id3: bool,
    /// Deliver coded frames verbatim to capable container sinks.
    pub write_compressed_passthrough: bool,
    pub track_filename_policy: TrackFilenamePolicy,
    pub album_dir_policy: AlbumDirPolicy,
    pub channel_area: ChannelArea,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            pcm_bit_depth: PcmBitDepth::default(),
            pcm_sample_rate: 0,
            pcm_quality: PcmQuality::default(),
            flac_compression: 5,
            write_id3: true,
            write_compressed_passthrough: false,
            track_filename_policy: TrackFilenamePolicy::default(),
            album_dir_policy: AlbumDirPolicy::default(),
            channel_area: ChannelArea::default(),
        }
    }
}
