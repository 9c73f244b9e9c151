//! Pipeline nodes: sources produce frames and own the metadata,
//! transforms rewrite one stream into another, sinks consume frames and
//! write artifacts.
//!
//! The coordinator drives every node sequentially on one task, so
//! implementations never need interior synchronisation. A sink sees
//! exactly one `open`, matched `track_start`/`track_end` pairs, one
//! `finalize`, then one `close`.

use async_trait::async_trait;

use dsdmeta::{AlbumInfo, TrackInfo};

use crate::error::PipelineError;
use crate::format::AudioFormat;
use crate::frame::Frame;

pub mod cue_sink;
pub mod dsdiff_sink;
pub mod dsdiff_source;
pub mod dsf_sink;
pub mod dsf_source;
pub mod dst_decoder_node;
pub mod edit_master_sink;
#[cfg(feature = "flac")]
pub mod flac_sink;
/// Stub when the FLAC encoder is not compiled in: configuring the sink
/// reports the feature as unavailable instead of failing to link.
#[cfg(not(feature = "flac"))]
pub mod flac_sink {
    use std::path::PathBuf;

    use crate::error::PipelineError;
    use crate::options::{AlbumDirPolicy, PcmBitDepth, PipelineOptions, TrackFilenamePolicy};

    #[derive(Debug, Clone)]
    pub struct FlacSinkConfig {
        pub base_dir: PathBuf,
        pub bit_depth: PcmBitDepth,
        pub compression: u32,
        pub track_policy: TrackFilenamePolicy,
        pub album_policy: AlbumDirPolicy,
    }

    impl FlacSinkConfig {
        pub fn from_options(base_dir: impl Into<PathBuf>, options: &PipelineOptions) -> Self {
            FlacSinkConfig {
                base_dir: base_dir.into(),
                bit_depth: options.pcm_bit_depth,
                compression: options.flac_compression,
                track_policy: options.track_filename_policy,
                album_policy: options.album_dir_policy,
            }
        }
    }

    pub enum FlacTrackSink {}

    impl FlacTrackSink {
        pub fn new(_config: FlacSinkConfig) -> Result<Self, PipelineError> {
            Err(PipelineError::FeatureUnavailable(
                "FLAC sink requires the `flac` feature",
            ))
        }
    }
}
pub mod pcm_export_node;
pub mod sacd_source;
pub mod text_sink;
pub mod wav_sink;
pub mod xml_sink;

/// What a sink can accept at its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCapability {
    /// Multibit PCM after the export transform.
    Pcm,
    /// Canonical one-bit audio.
    OneBitRaw,
    /// Coded one-bit frames, written verbatim without decoding.
    OneBitPassthrough,
    /// Observes track boundaries only; payload bytes are ignored.
    MetadataOnly,
}

/// Produces framed audio and owns the album/track metadata.
#[async_trait]
pub trait FrameSource: Send {
    /// Stream format, fixed at open time.
    fn format(&self) -> AudioFormat;

    fn album_info(&self) -> AlbumInfo;

    fn track_count(&self) -> u32;

    /// Metadata for a 1-based track number.
    fn track_info(&self, number: u32) -> Result<TrackInfo, PipelineError>;

    /// Position the source at a track's start; the next `next_frame`
    /// calls yield that track's frames.
    async fn seek_track(&mut self, number: u32) -> Result<(), PipelineError>;

    /// Next frame of the current track, `None` at its end. Sequence
    /// numbers restart at zero for every track.
    async fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

/// Rewrites one stream variant into another. A transform may emit zero,
/// one, or many frames per input.
#[async_trait]
pub trait FrameTransform: Send {
    /// Format of the frames this transform emits for a given input.
    fn output_format(&self, input: &AudioFormat) -> AudioFormat;

    async fn process(&mut self, frame: &Frame) -> Result<Vec<Frame>, PipelineError>;

    /// Drain buffered state at a track boundary. Stateless transforms
    /// return nothing.
    async fn flush(&mut self) -> Result<Vec<Frame>, PipelineError>;
}

/// Consumes frames and writes one artifact (or artifact set) per track
/// or per run.
#[async_trait]
pub trait FrameSink: Send {
    fn capabilities(&self) -> SinkCapability;

    /// `format` is the format of the frames this sink will receive,
    /// settled by negotiation. Metadata is copied; sinks keep no
    /// references past `track_end`.
    async fn open(&mut self, format: &AudioFormat, album: &AlbumInfo)
        -> Result<(), PipelineError>;

    async fn track_start(&mut self, number: u32, track: &TrackInfo)
        -> Result<(), PipelineError>;

    /// Returns the bytes written for progress accounting.
    async fn write_frame(&mut self, frame: &Frame) -> Result<u64, PipelineError>;

    async fn track_end(&mut self, number: u32) -> Result<(), PipelineError>;

    /// Back-patch sizes, write trailing metadata; at most once per open.
    async fn finalize(&mut self) -> Result<(), PipelineError>;

    async fn close(&mut self) -> Result<(), PipelineError>;
}
