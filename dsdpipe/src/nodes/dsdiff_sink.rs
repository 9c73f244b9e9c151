//! Per-track sink writing one big-endian container file per track.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use dsdfmt::{id3, Compression, DsdiffFile};
use dsdmeta::{AlbumInfo, TrackInfo};

use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::naming::{album_dir_name, track_file_stem, unique_path};
use crate::nodes::{FrameSink, SinkCapability};
use crate::options::{AlbumDirPolicy, TrackFilenamePolicy};

#[derive(Debug, Clone)]
pub struct DsdiffSinkConfig {
    pub base_dir: PathBuf,
    pub track_policy: TrackFilenamePolicy,
    pub album_policy: AlbumDirPolicy,
    pub write_id3: bool,
}

impl DsdiffSinkConfig {
    pub fn from_options(
        base_dir: impl Into<PathBuf>,
        options: &crate::options::PipelineOptions,
    ) -> Self {
        DsdiffSinkConfig {
            base_dir: base_dir.into(),
            track_policy: options.track_filename_policy,
            album_policy: options.album_dir_policy,
            write_id3: options.write_id3,
        }
    }
}

pub struct DsdiffTrackSink {
    config: DsdiffSinkConfig,
    album_dir: PathBuf,
    album: AlbumInfo,
    format: Option<AudioFormat>,
    current: Option<(DsdiffFile, TrackInfo)>,
}

impl DsdiffTrackSink {
    pub fn new(config: DsdiffSinkConfig) -> Self {
        DsdiffTrackSink {
            config,
            album_dir: PathBuf::new(),
            album: AlbumInfo::default(),
            format: None,
            current: None,
        }
    }
}

#[async_trait]
impl FrameSink for DsdiffTrackSink {
    fn capabilities(&self) -> SinkCapability {
        SinkCapability::OneBitRaw
    }

    async fn open(
        &mut self,
        format: &AudioFormat,
        album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        if format.kind != AudioKind::OneBitRaw {
            return Err(PipelineError::invalid_arg(
                "per-track container sink requires raw one-bit input",
            ));
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
        let format = self.format.ok_or(PipelineError::InvalidState(
            "track_start before open",
        ))?;
        let stem = track_file_stem(self.config.track_policy, track, &self.album);
        let path = unique_path(&self.album_dir, &stem, "dff");
        debug!(path = %path.display(), "starting track file");
        let file = DsdiffFile::create(
            &path,
            format.channels,
            format.sample_rate_hz,
            Compression::Dsd,
        )?;
        self.current = Some((file, track.clone()));
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<u64, PipelineError> {
        let (file, _) = self
            .current
            .as_mut()
            .ok_or(PipelineError::InvalidState("write_frame outside a track"))?;
        let written = file.write_audio(&frame.payload)?;
        Ok(written as u64)
    }

    async fn track_end(&mut self, _number: u32) -> Result<(), PipelineError> {
        let (mut file, track) = self
            .current
            .take()
            .ok_or(PipelineError::InvalidState("track_end without track_start"))?;
        {
            let metadata = file.metadata_mut()?;
            metadata.title = track.title.clone();
            metadata.artist = track
                .performer
                .clone()
                .or_else(|| self.album.artist.clone());
            if self.config.write_id3 {
                metadata.id3 = Some(id3::build_tag(&self.album, &track));
            }
        }
        file.finalize()?;
        file.close()?;
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
