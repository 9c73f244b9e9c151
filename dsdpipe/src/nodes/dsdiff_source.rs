//! Source over the big-endian container, raw or compressed.
//!
//! Track boundaries come from the detail-info markers when present
//! (track-start markers in sample units); without markers the whole
//! payload is one track. The compressed form yields one coded frame per
//! pipeline frame, CRC blocks attached.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;

use dsdfmt::{Compression, DsdiffFile};
use dsdmeta::{AlbumInfo, MarkerKind, TrackInfo};

use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::nodes::FrameSource;

pub struct DsdiffFileSource {
    file: DsdiffFile,
    format: AudioFormat,
    /// Per track: (start, duration) in one-bit frames.
    tracks: Vec<(u64, u64)>,
    frames_left: u64,
    seq: u64,
}

impl DsdiffFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let file = DsdiffFile::open(path)?;
        let kind = match file.compression() {
            Compression::Dsd => AudioKind::OneBitRaw,
            Compression::Dst => AudioKind::OneBitCompressed,
        };
        let format = AudioFormat::new(kind, file.sample_rate(), file.channels())?;
        format.validate()?;

        let total_frames = file.total_frames()?;
        let samples_per_frame = format.samples_per_frame();

        // Track-start markers carve the payload; a start at sample zero
        // is implicit.
        let mut starts: Vec<u64> = file
            .metadata()
            .markers
            .iter()
            .filter(|m| m.kind == MarkerKind::TrackStart)
            .map(|m| m.offset_samples / samples_per_frame)
            .collect();
        starts.sort_unstable();
        starts.dedup();
        if starts.first() != Some(&0) {
            starts.insert(0, 0);
        }
        let tracks: Vec<(u64, u64)> = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(total_frames);
                (start, end.saturating_sub(start))
            })
            .collect();

        Ok(DsdiffFileSource {
            file,
            format,
            tracks,
            frames_left: 0,
            seq: 0,
        })
    }
}

#[async_trait]
impl FrameSource for DsdiffFileSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn album_info(&self) -> AlbumInfo {
        let metadata = self.file.metadata();
        AlbumInfo {
            title: metadata.title.clone(),
            artist: metadata.artist.clone(),
            ..Default::default()
        }
    }

    fn track_count(&self) -> u32 {
        self.tracks.len() as u32
    }

    fn track_info(&self, number: u32) -> Result<TrackInfo, PipelineError> {
        let &(start, duration) = self
            .tracks
            .get(number.wrapping_sub(1) as usize)
            .ok_or_else(|| PipelineError::invalid_arg("track number out of range"))?;
        let metadata = self.file.metadata();
        // Marker text labels the track when the authoring tool wrote one.
        let title = metadata
            .markers
            .iter()
            .filter(|m| m.kind == MarkerKind::TrackStart)
            .find(|m| m.offset_samples / self.format.samples_per_frame() == start)
            .and_then(|m| m.text.clone())
            .or_else(|| metadata.title.clone());
        Ok(TrackInfo {
            title,
            performer: metadata.artist.clone(),
            number,
            total: self.tracks.len() as u32,
            start_frames: start,
            duration_frames: duration,
            ..Default::default()
        })
    }

    async fn seek_track(&mut self, number: u32) -> Result<(), PipelineError> {
        let &(start, duration) = self
            .tracks
            .get(number.wrapping_sub(1) as usize)
            .ok_or_else(|| PipelineError::invalid_arg("track number out of range"))?;
        match self.format.kind {
            AudioKind::OneBitRaw => {
                self.file.seek_frames(SeekFrom::Start(start))?;
            }
            AudioKind::OneBitCompressed => {
                // Mid-stream entry needs the index chunk; frame zero is
                // always reachable.
                self.file.seek_coded_frames(SeekFrom::Start(start))?;
            }
            _ => unreachable!("container sources are one-bit"),
        }
        self.frames_left = duration;
        self.seq = 0;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.frames_left == 0 {
            return Ok(None);
        }
        let frame = match self.format.kind {
            AudioKind::OneBitRaw => {
                let mut buf = vec![0u8; self.format.one_bit_frame_bytes() as usize];
                let read = self.file.read_audio(&mut buf)?;
                if read == 0 {
                    self.frames_left = 0;
                    return Ok(None);
                }
                buf.truncate(read);
                Frame::new(self.format, self.seq, buf)
            }
            AudioKind::OneBitCompressed => match self.file.read_dst_frame()? {
                Some(coded) => {
                    Frame::with_crc(self.format, self.seq, coded.data, coded.crc)
                }
                None => {
                    self.frames_left = 0;
                    return Ok(None);
                }
            },
            _ => unreachable!("container sources are one-bit"),
        };
        self.frames_left -= 1;
        self.seq += 1;
        Ok(Some(frame))
    }
}
