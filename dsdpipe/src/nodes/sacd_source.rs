//! Source over a disc image or authenticated drive.

use async_trait::async_trait;

use dsdmeta::{AlbumInfo, TrackInfo};
use dsdsacd::{Area, SacdReader, SectorSource};

use crate::error::PipelineError;
use crate::format::{AudioFormat, AudioKind};
use crate::frame::Frame;
use crate::nodes::FrameSource;
use crate::options::ChannelArea;

impl From<ChannelArea> for Area {
    fn from(area: ChannelArea) -> Area {
        match area {
            ChannelArea::Stereo => Area::Stereo,
            ChannelArea::Multichannel => Area::Multichannel,
        }
    }
}

/// Reads one channel area of a disc, a frame at a time.
pub struct SacdDiscSource<S: SectorSource> {
    reader: SacdReader<S>,
    area: Area,
    format: AudioFormat,
    track_count: u32,
    /// Byte cursor and end within the area audio stream.
    cursor: u64,
    end: u64,
    seq: u64,
}

impl<S: SectorSource> SacdDiscSource<S> {
    pub fn open(source: S, channel_area: ChannelArea) -> Result<Self, PipelineError> {
        let reader = SacdReader::open(source)?;
        let area: Area = channel_area.into();
        let toc = reader
            .area(area)
            .ok_or_else(|| PipelineError::invalid_arg("requested area not on this disc"))?;
        let format = AudioFormat::new(
            AudioKind::OneBitRaw,
            toc.sample_rate,
            toc.channel_count,
        )?;
        format.validate()?;
        let track_count = toc.track_count();
        Ok(SacdDiscSource {
            reader,
            area,
            format,
            track_count,
            cursor: 0,
            end: 0,
            seq: 0,
        })
    }
}

#[async_trait]
impl<S: SectorSource> FrameSource for SacdDiscSource<S> {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn album_info(&self) -> AlbumInfo {
        self.reader.album_info()
    }

    fn track_count(&self) -> u32 {
        self.track_count
    }

    fn track_info(&self, number: u32) -> Result<TrackInfo, PipelineError> {
        let toc = self
            .reader
            .area(self.area)
            .expect("area checked at open");
        Ok(toc.track_info(number)?)
    }

    async fn seek_track(&mut self, number: u32) -> Result<(), PipelineError> {
        let track = self.track_info(number)?;
        let frame_bytes = self.format.one_bit_frame_bytes();
        self.cursor = track.start_frames * frame_bytes;
        self.end = (track.start_frames + track.duration_frames) * frame_bytes;
        self.seq = 0;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.cursor >= self.end {
            return Ok(None);
        }
        let frame_bytes = self.format.one_bit_frame_bytes();
        let want = frame_bytes.min(self.end - self.cursor) as usize;
        let mut buf = vec![0u8; want];
        let read = self
            .reader
            .read_area_audio(self.area, self.cursor, &mut buf)?;
        if read == 0 {
            return Err(PipelineError::Sacd(dsdsacd::SacdError::UnexpectedEof));
        }
        buf.truncate(read);
        self.cursor += read as u64;
        let frame = Frame::new(self.format, self.seq, buf);
        self.seq += 1;
        Ok(Some(frame))
    }
}
