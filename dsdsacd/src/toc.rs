//! Album and area table-of-contents structures.
//!
//! The master TOC sits at a fixed sector and names the album, the disc
//! date, and the per-area TOC locations. Each area TOC carries the track
//! table for one channel configuration: start offset and duration in
//! one-bit frames (75 per second), track text, and the ISRC. Audio data
//! runs contiguously from the area's start sector in the canonical
//! channel-interleaved MSB-first layout.

use tracing::{debug, warn};

use dsdmeta::{AlbumInfo, Isrc, TrackInfo};

use crate::sector::{SectorSource, SECTOR_SIZE};
use crate::SacdError;

/// Logical sector number of the master TOC.
pub const MASTER_TOC_LSN: u32 = 510;

const MASTER_MAGIC: &[u8; 8] = b"SACDMTOC";
const STEREO_MAGIC: &[u8; 8] = b"TWOCHTOC";
const MULTI_MAGIC: &[u8; 8] = b"MULCHTOC";

/// Size of one track record inside an area TOC.
const TRACK_RECORD: usize = 128;
/// Offset of the first track record inside an area TOC.
const TRACK_TABLE_START: usize = 32;

/// The two channel areas a disc may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Stereo,
    Multichannel,
}

/// Parsed master TOC.
#[derive(Debug, Clone)]
pub struct MasterToc {
    pub version: u16,
    pub album_set_size: u16,
    pub album_sequence: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub catalog_number: Option<String>,
    pub genre: Option<String>,
    pub album_title: Option<String>,
    pub album_artist: Option<String>,
    pub publisher: Option<String>,
    pub copyright: Option<String>,
    stereo_toc: Option<(u32, u16)>,
    multi_toc: Option<(u32, u16)>,
}

/// One track entry of an area TOC.
#[derive(Debug, Clone)]
pub struct AreaTrack {
    pub start_frames: u64,
    pub duration_frames: u64,
    pub isrc: Option<Isrc>,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub songwriter: Option<String>,
}

/// Parsed area TOC.
#[derive(Debug, Clone)]
pub struct AreaToc {
    pub area: Area,
    pub channel_count: u32,
    pub sample_rate: u32,
    pub audio_start_lsn: u32,
    pub tracks: Vec<AreaTrack>,
}

impl AreaToc {
    pub fn track_count(&self) -> u32 {
        self.tracks.len() as u32
    }

    /// Canonical bytes in one one-bit frame across all channels.
    pub fn frame_bytes(&self) -> u64 {
        (588 * (self.sample_rate / 44_100) as u64 / 8) * self.channel_count as u64
    }

    /// Total audio bytes implied by the track table.
    pub fn audio_len(&self) -> u64 {
        self.tracks
            .iter()
            .map(|t| t.start_frames + t.duration_frames)
            .max()
            .unwrap_or(0)
            * self.frame_bytes()
    }

    /// Track metadata for a 1-based track number.
    pub fn track_info(&self, number: u32) -> Result<TrackInfo, SacdError> {
        let track = self
            .tracks
            .get(number.checked_sub(1).ok_or(SacdError::InvalidArg(
                "track numbers are 1-based",
            ))? as usize)
            .ok_or(SacdError::InvalidArg("track number out of range"))?;
        Ok(TrackInfo {
            title: track.title.clone(),
            performer: track.performer.clone(),
            songwriter: track.songwriter.clone(),
            composer: None,
            arranger: None,
            isrc: track.isrc.clone(),
            start_frames: track.start_frames,
            duration_frames: track.duration_frames,
            number,
            total: self.track_count(),
            extra: Default::default(),
        })
    }
}

/// Reader over any sector source: master TOC, area TOCs, area audio.
pub struct SacdReader<S: SectorSource> {
    source: S,
    master: MasterToc,
    stereo: Option<AreaToc>,
    multi: Option<AreaToc>,
}

impl<S: SectorSource> SacdReader<S> {
    pub fn open(mut source: S) -> Result<Self, SacdError> {
        let mut sector = vec![0u8; SECTOR_SIZE];
        source.read_sectors(MASTER_TOC_LSN, &mut sector)?;
        let master = parse_master_toc(&sector)?;

        let stereo = match master.stereo_toc {
            Some((start, len)) => Some(parse_area_toc(
                &mut source,
                Area::Stereo,
                start,
                len,
            )?),
            None => None,
        };
        let multi = match master.multi_toc {
            Some((start, len)) => Some(parse_area_toc(
                &mut source,
                Area::Multichannel,
                start,
                len,
            )?),
            None => None,
        };

        if stereo.is_none() && multi.is_none() {
            return Err(SacdError::InvalidFile("disc carries no audio area"));
        }
        debug!(
            title = master.album_title.as_deref().unwrap_or("<untitled>"),
            stereo = stereo.is_some(),
            multichannel = multi.is_some(),
            "opened disc table of contents"
        );

        Ok(SacdReader {
            source,
            master,
            stereo,
            multi,
        })
    }

    pub fn master(&self) -> &MasterToc {
        &self.master
    }

    pub fn area(&self, area: Area) -> Option<&AreaToc> {
        match area {
            Area::Stereo => self.stereo.as_ref(),
            Area::Multichannel => self.multi.as_ref(),
        }
    }

    /// Album-scope metadata from the master TOC.
    pub fn album_info(&self) -> AlbumInfo {
        AlbumInfo {
            title: self.master.album_title.clone(),
            artist: self.master.album_artist.clone(),
            publisher: self.master.publisher.clone(),
            copyright: self.master.copyright.clone(),
            catalog_number: self.master.catalog_number.clone(),
            genre: self.master.genre.clone(),
            year: (self.master.year != 0).then_some(self.master.year as u32),
            disc_number: (self.master.album_sequence != 0)
                .then_some(self.master.album_sequence as u32),
            disc_total: (self.master.album_set_size != 0)
                .then_some(self.master.album_set_size as u32),
        }
    }

    /// Read area audio at an absolute byte offset into the area stream.
    pub fn read_area_audio(
        &mut self,
        area: Area,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, SacdError> {
        let toc = match area {
            Area::Stereo => self.stereo.as_ref(),
            Area::Multichannel => self.multi.as_ref(),
        }
        .ok_or(SacdError::InvalidArg("area not present on this disc"))?;

        let audio_len = toc.audio_len();
        if offset >= audio_len {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(audio_len - offset) as usize;
        let start_lsn = toc.audio_start_lsn;

        let first_sector = offset / SECTOR_SIZE as u64;
        let last_sector = (offset + want as u64 - 1) / SECTOR_SIZE as u64;
        let sectors = (last_sector - first_sector + 1) as usize;

        let mut scratch = vec![0u8; sectors * SECTOR_SIZE];
        self.source
            .read_sectors(start_lsn + first_sector as u32, &mut scratch)?;

        let skip = (offset % SECTOR_SIZE as u64) as usize;
        buf[..want].copy_from_slice(&scratch[skip..skip + want]);
        Ok(want)
    }
}

fn text_field(bytes: &[u8]) -> Option<String> {
    let trimmed: &[u8] = {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        &bytes[..end]
    };
    let text = String::from_utf8_lossy(trimmed).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn parse_master_toc(sector: &[u8]) -> Result<MasterToc, SacdError> {
    if &sector[0..8] != MASTER_MAGIC {
        return Err(SacdError::InvalidFile("missing master TOC signature"));
    }
    let u16_at = |o: usize| u16::from_be_bytes([sector[o], sector[o + 1]]);
    let u32_at = |o: usize| {
        u32::from_be_bytes([sector[o], sector[o + 1], sector[o + 2], sector[o + 3]])
    };

    let stereo_start = u32_at(52);
    let stereo_len = u16_at(56);
    let multi_start = u32_at(60);
    let multi_len = u16_at(64);

    Ok(MasterToc {
        version: u16_at(8),
        album_set_size: u16_at(10),
        album_sequence: u16_at(12),
        year: u16_at(14),
        month: sector[16],
        day: sector[17],
        catalog_number: text_field(&sector[20..36]),
        genre: text_field(&sector[36..52]),
        album_title: text_field(&sector[128..192]),
        album_artist: text_field(&sector[192..256]),
        publisher: text_field(&sector[256..320]),
        copyright: text_field(&sector[320..384]),
        stereo_toc: (stereo_len > 0).then_some((stereo_start, stereo_len)),
        multi_toc: (multi_len > 0).then_some((multi_start, multi_len)),
    })
}

fn parse_area_toc<S: SectorSource>(
    source: &mut S,
    area: Area,
    start: u32,
    len_sectors: u16,
) -> Result<AreaToc, SacdError> {
    let mut data = vec![0u8; len_sectors as usize * SECTOR_SIZE];
    source.read_sectors(start, &mut data)?;

    let expected_magic = match area {
        Area::Stereo => STEREO_MAGIC,
        Area::Multichannel => MULTI_MAGIC,
    };
    if &data[0..8] != expected_magic {
        return Err(SacdError::InvalidFile("missing area TOC signature"));
    }

    let track_count = data[10] as usize;
    let channel_count = data[11] as u32;
    let sample_rate =
        u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
    let audio_start_lsn =
        u32::from_be_bytes([data[16], data[17], data[18], data[19]]);

    if channel_count == 0 || channel_count > 6 {
        return Err(SacdError::InvalidFile("area channel count out of range"));
    }
    if sample_rate == 0 || sample_rate % 44_100 != 0 {
        return Err(SacdError::InvalidFile("area sample rate out of range"));
    }
    if TRACK_TABLE_START + track_count * TRACK_RECORD > data.len() {
        return Err(SacdError::InvalidFile("track table exceeds the area TOC"));
    }

    let mut tracks = Vec::with_capacity(track_count);
    for i in 0..track_count {
        let record = &data[TRACK_TABLE_START + i * TRACK_RECORD..][..TRACK_RECORD];
        let start_frames = u64::from_be_bytes(record[0..8].try_into().unwrap());
        let duration_frames = u64::from_be_bytes(record[8..16].try_into().unwrap());
        let isrc = if record[16..28].iter().all(|&b| b == 0) {
            None
        } else {
            match std::str::from_utf8(&record[16..28]).ok().map(Isrc::new) {
                Some(Ok(isrc)) => Some(isrc),
                _ => {
                    warn!(track = i + 1, "ignoring malformed ISRC");
                    None
                }
            }
        };
        tracks.push(AreaTrack {
            start_frames,
            duration_frames,
            isrc,
            title: text_field(&record[28..68]),
            performer: text_field(&record[68..98]),
            songwriter: text_field(&record[98..128]),
        });
    }

    Ok(AreaToc {
        area,
        channel_count,
        sample_rate,
        audio_start_lsn,
        tracks,
    })
}
