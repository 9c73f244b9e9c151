//! Source over a single per-track container file. One track spanning the
//! whole payload.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;

use dsdfmt::DsfFile;
use dsdmeta::{AlbumInfo, TrackInfo};

use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::nodes::FrameSource;

pub struct DsfFileSource {
    file: DsfFile,
    format: AudioFormat,
    title: Option<String>,
    total_frames: u64,
    frames_left: u64,
    seq: u64,
}

impl DsfFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let file = DsfFile::open(path)?;
        let format = AudioFormat::new(
            AudioKind::OneBitRaw,
            file.sample_rate(),
            file.channels(),
        )?;
        format.validate()?;
        let total_frames = file.total_frames()?;
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        Ok(DsfFileSource {
            file,
            format,
            title,
            total_frames,
            frames_left: 0,
            seq: 0,
        })
    }
}

#[async_trait]
impl FrameSource for DsfFileSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn album_info(&self) -> AlbumInfo {
        AlbumInfo {
            title: self.title.clone(),
            ..Default::default()
        }
    }

    fn track_count(&self) -> u32 {
        1
    }

    fn track_info(&self, number: u32) -> Result<TrackInfo, PipelineError> {
        if number != 1 {
            return Err(PipelineError::invalid_arg("track number out of range"));
        }
        Ok(TrackInfo {
            title: self.title.clone(),
            number: 1,
            total: 1,
            start_frames: 0,
            duration_frames: self.total_frames,
            ..Default::default()
        })
    }

    async fn seek_track(&mut self, number: u32) -> Result<(), PipelineError> {
        if number != 1 {
            return Err(PipelineError::invalid_arg("track number out of range"));
        }
        self.file.seek_frames(SeekFrom::Start(0))?;
        self.frames_left = self.total_frames;
        self.seq = 0;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.frames_left == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.format.one_bit_frame_bytes() as usize];
        let read = self.file.read_audio(&mut buf)?;
        if read == 0 {
            self.frames_left = 0;
            return Ok(None);
        }
        buf.truncate(read);
        self.frames_left -= 1;
        let frame = Frame::new(self.format, self.seq, buf);
        self.seq += 1;
        Ok(Some(frame))
    }
}
