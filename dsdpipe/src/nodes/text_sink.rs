//! Human-readable report sink writing to any stream, standard output by
//! default.

use std::io::Write;

use async_trait::async_trait;

use dsdmeta::{AlbumInfo, TrackInfo};

use crate::error::PipelineError;
use crate::format::AudioFormat;
use crate::frame::Frame;
use crate::nodes::{FrameSink, SinkCapability};

pub struct TextReportSink {
    writer: Box<dyn Write + Send>,
    in_track: bool,
    tracks_seen: u32,
}

impl TextReportSink {
    /// Report to standard output.
    pub fn stdout() -> Self {
        Self::to_writer(Box::new(std::io::stdout()))
    }

    pub fn to_writer(writer: Box<dyn Write + Send>) -> Self {
        TextReportSink {
            writer,
            in_track: false,
            tracks_seen: 0,
        }
    }
}

#[async_trait]
impl FrameSink for TextReportSink {
    fn capabilities(&self) -> SinkCapability {
        SinkCapability::MetadataOnly
    }

    async fn open(
        &mut self,
        format: &AudioFormat,
        album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        writeln!(
            self.writer,
            "Album:     {}",
            album.title.as_deref().unwrap_or("(untitled)")
        )?;
        if let Some(artist) = &album.artist {
            writeln!(self.writer, "Artist:    {artist}")?;
        }
        if let Some(year) = album.year {
            writeln!(self.writer, "Year:      {year}")?;
        }
        writeln!(
            self.writer,
            "Stream:    {} Hz, {} ch, {:?}",
            format.sample_rate_hz, format.channels, format.kind
        )?;
        writeln!(self.writer)?;
        Ok(())
    }

    async fn track_start(
        &mut self,
        number: u32,
        track: &TrackInfo,
    ) -> Result<(), PipelineError> {
        if self.in_track {
            return Err(PipelineError::InvalidState("track already open"));
        }
        writeln!(
            self.writer,
            "  {:02}  [{} + {}]  {}",
            number,
            track.start_time(),
            track.duration_time(),
            track.title.as_deref().unwrap_or("(untitled)")
        )?;
        self.in_track = true;
        self.tracks_seen += 1;
        Ok(())
    }

    async fn write_frame(&mut self, _frame: &Frame) -> Result<u64, PipelineError> {
        Ok(0)
    }

    async fn track_end(&mut self, _number: u32) -> Result<(), PipelineError> {
        if !self.in_track {
            return Err(PipelineError::InvalidState("track_end without track_start"));
        }
        self.in_track = false;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), PipelineError> {
        writeln!(self.writer)?;
        writeln!(self.writer, "{} track(s).", self.tracks_seen)?;
        self.writer.flush()?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}
