//! FLAC sink: one file per track, encoded with the pure-Rust encoder.
//!
//! Accepts 16- or 24-bit output depths; a 32-bit request is coerced to 24
//! with a warning at configure time. Track metadata lands in a vorbis
//! comment block spliced in after the stream-info block.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use flacenc::source::MemSource;

use dsdmeta::{AlbumInfo, TrackInfo};

use crate::dsp::{f64_to_i32_samples, payload_to_f64};
use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::naming::{album_dir_name, track_file_stem, unique_path};
use crate::nodes::{FrameSink, SinkCapability};
use crate::options::{AlbumDirPolicy, PcmBitDepth, TrackFilenamePolicy};

#[derive(Debug, Clone)]
pub struct FlacSinkConfig {
    pub base_dir: PathBuf,
    pub bit_depth: PcmBitDepth,
    /// Encoder effort, 0..=8.
    pub compression: u32,
    pub track_policy: TrackFilenamePolicy,
    pub album_policy: AlbumDirPolicy,
}

impl FlacSinkConfig {
    pub fn from_options(
        base_dir: impl Into<PathBuf>,
        options: &crate::options::PipelineOptions,
    ) -> Self {
        FlacSinkConfig {
            base_dir: base_dir.into(),
            bit_depth: options.pcm_bit_depth,
            compression: options.flac_compression,
            track_policy: options.track_filename_policy,
            album_policy: options.album_dir_policy,
        }
    }
}

pub struct FlacTrackSink {
    config: FlacSinkConfig,
    bits: u32,
    album_dir: PathBuf,
    album: AlbumInfo,
    format: Option<AudioFormat>,
    current: Option<TrackState>,
}

struct TrackState {
    path: PathBuf,
    track: TrackInfo,
    samples: Vec<i32>,
}

impl FlacTrackSink {
    pub fn new(config: FlacSinkConfig) -> Result<Self, PipelineError> {
        if config.compression > 8 {
            return Err(PipelineError::invalid_arg(
                "FLAC compression level must be 0..=8",
            ));
        }
        let bits = match config.bit_depth {
            PcmBitDepth::B16 => 16,
            PcmBitDepth::B24 => 24,
            PcmBitDepth::B32 => {
                warn!("FLAC does not support 32-bit output; coercing to 24");
                24
            }
        };
        Ok(FlacTrackSink {
            config,
            bits,
            album_dir: PathBuf::new(),
            album: AlbumInfo::default(),
            format: None,
            current: None,
        })
    }

    fn block_size(&self) -> usize {
        // The low effort tiers use the short legacy block size.
        if self.config.compression <= 2 {
            1_152
        } else {
            4_096
        }
    }
}

#[async_trait]
impl FrameSink for FlacTrackSink {
    fn capabilities(&self) -> SinkCapability {
        SinkCapability::Pcm
    }

    async fn open(
        &mut self,
        format: &AudioFormat,
        album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        if !format.kind.is_pcm() {
            return Err(PipelineError::invalid_arg("FLAC sink requires PCM input"));
        }
        self.album_dir = self
            .config
            .base_dir
            .join(album_dir_name(self.config.album_policy, album));
        std::fs::create_dir_all(&self.album_dir)?;
        self.album = album.clone();
        self.format = Some(*format);
        Ok(())
    }

    async fn track_start(
        &mut self,
        _number: u32,
        track: &TrackInfo,
    ) -> Result<(), PipelineError> {
        if self.current.is_some() {
            return Err(PipelineError::InvalidState("track already open"));
        }
        if self.format.is_none() {
            return Err(PipelineError::InvalidState("track_start before open"));
        }
        let stem = track_file_stem(self.config.track_policy, track, &self.album);
        let path = unique_path(&self.album_dir, &stem, "flac");
        debug!(path = %path.display(), "starting track file");
        self.current = Some(TrackState {
            path,
            track: track.clone(),
            samples: Vec::new(),
        });
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<u64, PipelineError> {
        let state = self
            .current
            .as_mut()
            .ok_or(PipelineError::InvalidState("write_frame outside a track"))?;
        if frame.format.kind != AudioKind::PcmFloat64 {
            return Err(PipelineError::invalid_arg(
                "FLAC sink expects 64-bit float frames from the export transform",
            ));
        }
        let samples = payload_to_f64(&frame.payload);
        state
            .samples
            .extend(f64_to_i32_samples(&samples, self.bits));
        Ok((samples.len() * (self.bits as usize / 8)) as u64)
    }

    async fn track_end(&mut self, _number: u32) -> Result<(), PipelineError> {
        let state = self
            .current
            .take()
            .ok_or(PipelineError::InvalidState("track_end without track_start"))?;
        let format = self.format.expect("set at open");

        let source = MemSource::from_samples(
            &state.samples,
            format.channels as usize,
            self.bits as usize,
            format.sample_rate_hz as usize,
        );
        let config = flacenc::config::Encoder::default()
            .into_verified()
            .map_err(|_| {
                PipelineError::InvalidState("FLAC encoder configuration rejected")
            })?;
        let stream = flacenc::encode_with_fixed_block_size(&config, source, self.block_size())
            .map_err(|e| PipelineError::invalid_arg(format!("FLAC encoding failed: {e:?}")))?;

        let mut sink = ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|e| PipelineError::invalid_arg(format!("FLAC write failed: {e:?}")))?;

        let tagged = insert_vorbis_comment(
            sink.as_slice(),
            &vorbis_comments(&self.album, &state.track),
        )?;
        std::fs::write(&state.path, tagged)?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        if self.current.is_some() {
            return Err(PipelineError::InvalidState("close inside a track"));
        }
        Ok(())
    }
}

fn vorbis_comments(album: &AlbumInfo, track: &TrackInfo) -> Vec<(String, String)> {
    let mut comments = Vec::new();
    let mut push = |key: &str, value: Option<&str>| {
        if let Some(value) = value {
            comments.push((key.to_string(), value.to_string()));
        }
    };
    push("TITLE", track.title.as_deref());
    push(
        "ARTIST",
        track.performer.as_deref().or(album.artist.as_deref()),
    );
    push("ALBUM", album.title.as_deref());
    push("GENRE", album.genre.as_deref());
    push("COPYRIGHT", album.copyright.as_deref());
    push("ISRC", track.isrc.as_ref().map(|i| i.as_str()));
    if track.number > 0 {
        comments.push(("TRACKNUMBER".into(), track.number.to_string()));
    }
    if let Some(year) = album.year {
        comments.push(("DATE".into(), year.to_string()));
    }
    comments
}

/// Splice a vorbis comment metadata block in after the stream-info block
/// of an encoded FLAC byte stream.
fn insert_vorbis_comment(
    encoded: &[u8],
    comments: &[(String, String)],
) -> Result<Vec<u8>, PipelineError> {
    if encoded.len() < 8 || &encoded[0..4] != b"fLaC" {
        return Err(PipelineError::InvalidState(
            "encoder produced an unrecognisable stream",
        ));
    }

    // Vorbis comment body: vendor string, then key=value entries, all
    // little-endian length-prefixed.
    let vendor = b"dsdkit";
    let mut body = Vec::new();
    body.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    body.extend_from_slice(vendor);
    body.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for (key, value) in comments {
        let entry = format!("{key}={value}");
        body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        body.extend_from_slice(entry.as_bytes());
    }

    // Walk the metadata blocks to find where the stream-info block ends.
    let mut out = Vec::with_capacity(encoded.len() + body.len() + 4);
    out.extend_from_slice(&encoded[0..4]);
    let mut pos = 4usize;
    let mut inserted = false;
    loop {
        if pos + 4 > encoded.len() {
            return Err(PipelineError::InvalidState(
                "encoder produced a truncated metadata section",
            ));
        }
        let header = encoded[pos];
        let last = header & 0x80 != 0;
        let length = u32::from_be_bytes([0, encoded[pos + 1], encoded[pos + 2], encoded[pos + 3]])
            as usize;
        // Copy the block, clearing the last-block flag since the comment
        // block follows.
        out.push(header & 0x7F);
        out.extend_from_slice(&encoded[pos + 1..pos + 4 + length]);
        pos += 4 + length;

        if !inserted {
            // Vorbis comment block type 4; it becomes the last metadata
            // block when its predecessor was.
            out.push(if last { 0x84 } else { 0x04 });
            out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(&body);
            inserted = true;
        }
        if last {
            break;
        }
    }
    out.extend_from_slice(&encoded[pos..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_block_lands_after_stream_info() {
        // Minimal fake stream: fLaC + last-flagged stream-info block of
        // 34 zero bytes + one frame byte.
        let mut stream = b"fLaC".to_vec();
        stream.push(0x80); // last block, type 0
        stream.extend_from_slice(&[0, 0, 34]);
        stream.extend_from_slice(&[0u8; 34]);
        stream.push(0xFF);

        let out = insert_vorbis_comment(
            &stream,
            &[("TITLE".to_string(), "Song".to_string())],
        )
        .unwrap();

        assert_eq!(&out[0..4], b"fLaC");
        // Stream-info no longer last.
        assert_eq!(out[4], 0x00);
        // Comment block follows stream info and is now last.
        let comment_header = out[4 + 4 + 34];
        assert_eq!(comment_header, 0x84);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("TITLE=Song"));
        // Audio byte survives at the tail.
        assert_eq!(*out.last().unwrap(), 0xFF);
    }

    #[test]
    fn garbage_streams_are_rejected() {
        assert!(insert_vorbis_comment(b"nope", &[]).is_err());
    }

    #[test]
    fn depth_coercion_warns_and_configures() {
        let sink = FlacTrackSink::new(FlacSinkConfig {
            base_dir: std::env::temp_dir(),
            bit_depth: PcmBitDepth::B32,
            compression: 5,
            track_policy: TrackFilenamePolicy::NumberOnly,
            album_policy: AlbumDirPolicy::TitleOnly,
        })
        .unwrap();
        assert_eq!(sink.bits, 24);
    }

    #[test]
    fn excessive_compression_is_rejected() {
        assert!(FlacTrackSink::new(FlacSinkConfig {
            base_dir: std::env::temp_dir(),
            bit_depth: PcmBitDepth::B16,
            compression: 9,
            track_policy: TrackFilenamePolicy::NumberOnly,
            album_policy: AlbumDirPolicy::TitleOnly,
        })
        .is_err());
    }
}
