//! WAV sink: one RIFF file per track through a streaming writer that
//! back-patches its size fields when the track closes. PCM input only;
//! the 32-bit depth writes IEEE float, everything else integer PCM.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use dsdmeta::{AlbumInfo, TrackInfo};

use crate::dsp::{f64_to_f32_bytes, f64_to_i16_bytes, f64_to_i24_bytes, payload_to_f64};
use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::naming::{album_dir_name, track_file_stem, unique_path};
use crate::nodes::{FrameSink, SinkCapability};
use crate::options::{AlbumDirPolicy, PcmBitDepth, TrackFilenamePolicy};

#[derive(Debug, Clone)]
pub struct WavSinkConfig {
    pub base_dir: PathBuf,
    pub bit_depth: PcmBitDepth,
    pub track_policy: TrackFilenamePolicy,
    pub album_policy: AlbumDirPolicy,
    /// Attach an INFO list with the track's text metadata.
    pub write_metadata: bool,
}

impl WavSinkConfig {
    pub fn from_options(
        base_dir: impl Into<PathBuf>,
        options: &crate::options::PipelineOptions,
    ) -> Self {
        WavSinkConfig {
            base_dir: base_dir.into(),
            bit_depth: options.pcm_bit_depth,
            track_policy: options.track_filename_policy,
            album_policy: options.album_dir_policy,
            write_metadata: options.write_id3,
        }
    }
}

pub struct WavTrackSink {
    config: WavSinkConfig,
    album_dir: PathBuf,
    album: AlbumInfo,
    format: Option<AudioFormat>,
    writer: Option<WavWriter>,
}

impl WavTrackSink {
    pub fn new(config: WavSinkConfig) -> Self {
        WavTrackSink {
            config,
            album_dir: PathBuf::new(),
            album: AlbumInfo::default(),
            format: None,
            writer: None,
        }
    }
}

#[async_trait]
impl FrameSink for WavTrackSink {
    fn capabilities(&self) -> SinkCapability {
        SinkCapability::Pcm
    }

    async fn open(
        &mut self,
        format: &AudioFormat,
        album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        if !format.kind.is_pcm() {
            return Err(PipelineError::invalid_arg("WAV sink requires PCM input"));
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
        if self.writer.is_some() {
            return Err(PipelineError::InvalidState("track already open"));
        }
        let format = self.format.ok_or(PipelineError::InvalidState(
            "track_start before open",
        ))?;
        let stem = track_file_stem(self.config.track_policy, track, &self.album);
        let path = unique_path(&self.album_dir, &stem, "wav");
        debug!(path = %path.display(), "starting track file");
        let mut writer = WavWriter::create(
            path,
            format.sample_rate_hz,
            format.channels as u16,
            self.config.bit_depth,
        )?;
        if self.config.write_metadata {
            writer.set_info(build_info(&self.album, track));
        }
        self.writer = Some(writer);
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<u64, PipelineError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(PipelineError::InvalidState("write_frame outside a track"))?;
        if frame.format.kind != AudioKind::PcmFloat64 {
            return Err(PipelineError::invalid_arg(
                "WAV sink expects 64-bit float frames from the export transform",
            ));
        }
        let samples = payload_to_f64(&frame.payload);
        let bytes = match self.config.bit_depth {
            PcmBitDepth::B16 => f64_to_i16_bytes(&samples),
            PcmBitDepth::B24 => f64_to_i24_bytes(&samples),
            PcmBitDepth::B32 => f64_to_f32_bytes(&samples),
        };
        writer.write_samples(&bytes)?;
        Ok(bytes.len() as u64)
    }

    async fn track_end(&mut self, _number: u32) -> Result<(), PipelineError> {
        let writer = self
            .writer
            .take()
            .ok_or(PipelineError::InvalidState("track_end without track_start"))?;
        writer.close()?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        if self.writer.is_some() {
            return Err(PipelineError::InvalidState("close inside a track"));
        }
        Ok(())
    }
}

/// INFO list entries: (fourcc, text).
fn build_info(album: &AlbumInfo, track: &TrackInfo) -> Vec<([u8; 4], String)> {
    let mut info = Vec::new();
    if let Some(title) = &track.title {
        info.push((*b"INAM", title.clone()));
    }
    if let Some(artist) = track.performer.as_ref().or(album.artist.as_ref()) {
        info.push((*b"IART", artist.clone()));
    }
    if let Some(album_title) = &album.title {
        info.push((*b"IPRD", album_title.clone()));
    }
    if let Some(genre) = &album.genre {
        info.push((*b"IGNR", genre.clone()));
    }
    if track.number > 0 {
        info.push((*b"ITRK", track.number.to_string()));
    }
    if let Some(year) = album.year {
        info.push((*b"ICRD", year.to_string()));
    }
    if let Some(copyright) = &album.copyright {
        info.push((*b"ICOP", copyright.clone()));
    }
    info
}

/// Streaming RIFF writer; sizes are patched at close.
struct WavWriter {
    file: File,
    data_bytes: u64,
    info: Vec<([u8; 4], String)>,
}

impl WavWriter {
    fn create(
        path: PathBuf,
        sample_rate: u32,
        channels: u16,
        depth: PcmBitDepth,
    ) -> Result<Self, PipelineError> {
        let mut file = File::create(path)?;

        let bits = depth.bits() as u16;
        let bytes_per_sample = (bits / 8) as u32;
        let block_align = channels as u32 * bytes_per_sample;
        // 32-bit output is IEEE float, everything else integer PCM.
        let format_tag: u16 = if depth == PcmBitDepth::B32 { 3 } else { 1 };

        let mut header = Vec::with_capacity(44);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&0u32.to_le_bytes()); // patched at close
        header.extend_from_slice(b"WAVE");
        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&format_tag.to_le_bytes());
        header.extend_from_slice(&channels.to_le_bytes());
        header.extend_from_slice(&sample_rate.to_le_bytes());
        header.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
        header.extend_from_slice(&(block_align as u16).to_le_bytes());
        header.extend_from_slice(&bits.to_le_bytes());
        header.extend_from_slice(b"data");
        header.extend_from_slice(&0u32.to_le_bytes()); // patched at close
        file.write_all(&header)?;

        Ok(WavWriter {
            file,
            data_bytes: 0,
            info: Vec::new(),
        })
    }

    fn set_info(&mut self, info: Vec<([u8; 4], String)>) {
        self.info = info;
    }

    fn write_samples(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        self.file.write_all(bytes)?;
        self.data_bytes += bytes.len() as u64;
        Ok(())
    }

    fn close(mut self) -> Result<(), PipelineError> {
        // Data chunks are word-aligned.
        if self.data_bytes % 2 != 0 {
            self.file.write_all(&[0])?;
        }

        if !self.info.is_empty() {
            let mut list = Vec::new();
            list.extend_from_slice(b"INFO");
            for (id, text) in &self.info {
                let mut value = text.as_bytes().to_vec();
                value.push(0);
                if value.len() % 2 != 0 {
                    value.push(0);
                }
                list.extend_from_slice(id);
                list.extend_from_slice(&(value.len() as u32).to_le_bytes());
                list.extend_from_slice(&value);
            }
            self.file.write_all(b"LIST")?;
            self.file.write_all(&(list.len() as u32).to_le_bytes())?;
            self.file.write_all(&list)?;
        }

        let file_len = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(4))?;
        self.file
            .write_all(&((file_len - 8) as u32).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(40))?;
        self.file
            .write_all(&(self.data_bytes as u32).to_le_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}
