//! Cue-sheet sink: one standard text sheet referencing a single target
//! audio file, an entry per selected track, `INDEX 01` times in the
//! 1/75-second unit.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;

use dsdmeta::{AlbumInfo, TimeCode, TrackInfo};

use crate::error::PipelineError;
use crate::format::AudioFormat;
use crate::frame::Frame;
use crate::nodes::{FrameSink, SinkCapability};

pub struct CueSheetSink {
    output_path: PathBuf,
    /// Filename the sheet's FILE line references, fixed at configure time.
    target_file: String,
    album: AlbumInfo,
    tracks: Vec<TrackInfo>,
    in_track: bool,
    finalized: bool,
}

impl CueSheetSink {
    pub fn new(output_path: impl Into<PathBuf>, target_file: impl Into<String>) -> Self {
        CueSheetSink {
            output_path: output_path.into(),
            target_file: target_file.into(),
            album: AlbumInfo::default(),
            tracks: Vec::new(),
            in_track: false,
            finalized: false,
        }
    }
}

#[async_trait]
impl FrameSink for CueSheetSink {
    fn capabilities(&self) -> SinkCapability {
        SinkCapability::MetadataOnly
    }

    async fn open(
        &mut self,
        _format: &AudioFormat,
        album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        self.album = album.clone();
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
        self.tracks.push(track.clone());
        self.in_track = true;
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
        if self.finalized {
            return Err(PipelineError::InvalidState("finalize called twice"));
        }
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::File::create(&self.output_path)?;

        if let Some(genre) = &self.album.genre {
            writeln!(file, "REM GENRE \"{genre}\"")?;
        }
        if let Some(year) = self.album.year {
            writeln!(file, "REM DATE {year}")?;
        }
        if let Some(catalog) = &self.album.catalog_number {
            writeln!(file, "CATALOG {catalog}")?;
        }
        if let Some(artist) = &self.album.artist {
            writeln!(file, "PERFORMER \"{artist}\"")?;
        }
        if let Some(title) = &self.album.title {
            writeln!(file, "TITLE \"{title}\"")?;
        }
        writeln!(file, "FILE \"{}\" WAVE", self.target_file)?;

        // Times are relative to the first selected track's start.
        let base = self.tracks.first().map_or(0, |t| t.start_frames);
        for (i, track) in self.tracks.iter().enumerate() {
            writeln!(file, "  TRACK {:02} AUDIO", i + 1)?;
            if let Some(title) = &track.title {
                writeln!(file, "    TITLE \"{title}\"")?;
            }
            if let Some(performer) = &track.performer {
                writeln!(file, "    PERFORMER \"{performer}\"")?;
            }
            if let Some(songwriter) = &track.songwriter {
                writeln!(file, "    SONGWRITER \"{songwriter}\"")?;
            }
            if let Some(isrc) = &track.isrc {
                writeln!(file, "    ISRC {isrc}")?;
            }
            let index = TimeCode::from_frames(track.start_frames - base);
            writeln!(file, "    INDEX 01 {index}")?;
        }
        file.flush()?;
        self.finalized = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioKind;

    #[tokio::test]
    async fn sheet_lists_every_track_with_75fps_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.cue");

        let format = AudioFormat::new(AudioKind::OneBitRaw, 2_822_400, 2).unwrap();
        let album = AlbumInfo {
            title: Some("Album".into()),
            artist: Some("Artist".into()),
            year: Some(2004),
            ..Default::default()
        };

        let mut sink = CueSheetSink::new(&path, "album.dff");
        sink.open(&format, &album).await.unwrap();
        for (number, start, duration) in [(1u32, 0u64, 150u64), (2, 150, 4_575), (3, 4_725, 75)] {
            let track = TrackInfo {
                title: Some(format!("Track {number}")),
                number,
                total: 3,
                start_frames: start,
                duration_frames: duration,
                ..Default::default()
            };
            sink.track_start(number, &track).await.unwrap();
            sink.track_end(number).await.unwrap();
        }
        sink.finalize().await.unwrap();
        sink.close().await.unwrap();

        let sheet = std::fs::read_to_string(&path).unwrap();
        assert!(sheet.contains("FILE \"album.dff\" WAVE"));
        assert!(sheet.contains("TRACK 01 AUDIO"));
        assert!(sheet.contains("INDEX 01 00:00:00"));
        // 150 frames = 2 seconds.
        assert!(sheet.contains("INDEX 01 00:02:00"));
        // 4725 frames = 63 seconds.
        assert!(sheet.contains("INDEX 01 01:03:00"));
        assert!(sheet.contains("REM DATE 2004"));
    }
}
