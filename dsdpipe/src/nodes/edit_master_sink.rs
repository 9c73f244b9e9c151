//! Edit-master sink: one big-endian container for the whole run, a
//! track-start marker at every track boundary. Optionally writes coded
//! frames verbatim (compressed passthrough) with the frame index chunk
//! generated at finalize.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use chrono::{Datelike, Local, Timelike};

use dsdfmt::{Comment, Compression, DsdiffFile};
use dsdmeta::{AlbumInfo, Marker, TrackInfo};

use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::naming::{album_dir_name, sanitise_component, unique_path};
use crate::nodes::{FrameSink, SinkCapability};
use crate::options::AlbumDirPolicy;

#[derive(Debug, Clone)]
pub struct EditMasterConfig {
    pub base_dir: PathBuf,
    pub album_policy: AlbumDirPolicy,
    /// Accept coded frames and write them verbatim.
    pub compressed_passthrough: bool,
}

impl EditMasterConfig {
    pub fn from_options(
        base_dir: impl Into<PathBuf>,
        options: &crate::options::PipelineOptions,
    ) -> Self {
        EditMasterConfig {
            base_dir: base_dir.into(),
            album_policy: options.album_dir_policy,
            compressed_passthrough: options.write_compressed_passthrough,
        }
    }
}

pub struct DsdiffEditMasterSink {
    config: EditMasterConfig,
    file: Option<DsdiffFile>,
    format: Option<AudioFormat>,
    album: AlbumInfo,
    markers: Vec<Marker>,
    /// Samples per channel written so far.
    samples_written: u64,
    in_track: bool,
    finalized: bool,
}

impl DsdiffEditMasterSink {
    pub fn new(config: EditMasterConfig) -> Self {
        DsdiffEditMasterSink {
            config,
            file: None,
            format: None,
            album: AlbumInfo::default(),
            markers: Vec::new(),
            samples_written: 0,
            in_track: false,
            finalized: false,
        }
    }
}

#[async_trait]
impl FrameSink for DsdiffEditMasterSink {
    fn capabilities(&self) -> SinkCapability {
        if self.config.compressed_passthrough {
            SinkCapability::OneBitPassthrough
        } else {
            SinkCapability::OneBitRaw
        }
    }

    async fn open(
        &mut self,
        format: &AudioFormat,
        album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        let compression = match (format.kind, self.config.compressed_passthrough) {
            (AudioKind::OneBitCompressed, true) => Compression::Dst,
            (AudioKind::OneBitRaw, _) => Compression::Dsd,
            _ => {
                return Err(PipelineError::invalid_arg(
                    "edit-master input format disagrees with the passthrough flag",
                ))
            }
        };

        let dir = self
            .config
            .base_dir
            .join(album_dir_name(self.config.album_policy, album));
        std::fs::create_dir_all(&dir)?;
        let stem = sanitise_component(album.title.as_deref().unwrap_or("Album"));
        let path = unique_path(&dir, &stem, "dff");
        debug!(path = %path.display(), ?compression, "creating edit master");

        let file = DsdiffFile::create(
            &path,
            format.channels,
            format.sample_rate_hz,
            compression,
        )?;
        self.file = Some(file);
        self.format = Some(*format);
        self.album = album.clone();
        // A re-run reuses the sink; every per-run field restarts here.
        self.markers.clear();
        self.samples_written = 0;
        self.in_track = false;
        self.finalized = false;
        Ok(())
    }

    async fn track_start(
        &mut self,
        _number: u32,
        track: &TrackInfo,
    ) -> Result<(), PipelineError> {
        if self.in_track {
            return Err(PipelineError::InvalidState("track already open"));
        }
        if self.file.is_none() {
            return Err(PipelineError::InvalidState("track_start before open"));
        }
        // Marker offsets use sample units, the container's convention.
        self.markers
            .push(Marker::track_start(self.samples_written, track.title.clone()));
        self.in_track = true;
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<u64, PipelineError> {
        if !self.in_track {
            return Err(PipelineError::InvalidState("write_frame outside a track"));
        }
        let file = self.file.as_mut().expect("checked at track_start");
        let format = self.format.expect("set at open");

        let written = match format.kind {
            AudioKind::OneBitRaw => {
                let written = file.write_audio(&frame.payload)?;
                self.samples_written += written as u64 * 8 / format.channels as u64;
                written as u64
            }
            AudioKind::OneBitCompressed => {
                file.write_dst_frame(&frame.payload, frame.crc.as_deref())?;
                self.samples_written += format.samples_per_frame();
                frame.payload.len() as u64
            }
            _ => unreachable!("edit master accepts one-bit input only"),
        };
        Ok(written)
    }

    async fn track_end(&mut self, _number: u32) -> Result<(), PipelineError> {
        if !self.in_track {
            return Err(PipelineError::InvalidState("track_end without track_start"));
        }
        self.in_track = false;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), PipelineError> {
        if self.finalized {
            return Err(PipelineError::InvalidState("finalize called twice"));
        }
        if let Some(file) = self.file.as_mut() {
            {
                let metadata = file.metadata_mut()?;
                metadata.title = self.album.title.clone();
                metadata.artist = self.album.artist.clone();
                metadata.markers = std::mem::take(&mut self.markers);

                let now = Local::now();
                metadata.comments.push(Comment {
                    year: now.year().clamp(0, u16::MAX as i32) as u16,
                    month: now.month() as u8,
                    day: now.day() as u8,
                    hour: now.hour() as u8,
                    minute: now.minute() as u8,
                    kind: 1, // file-history comment
                    reference: 0,
                    text: "Edited master".to_string(),
                });
            }
            file.finalize()?;
        }
        self.finalized = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        if let Some(file) = self.file.take() {
            file.close()?;
        }
        Ok(())
    }
}
