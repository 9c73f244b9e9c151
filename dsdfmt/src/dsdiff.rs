//! DSDIFF container codec (the big-endian, hierarchical format).
//!
//! A `FRM8` form wraps a version chunk, a property form, the sound data
//! (`DSD ` raw audio or `DST ` coded frames), and optional metadata children:
//! comments, the detail-info hierarchy (edition ID, disc artist/title,
//! markers), a manufacturer chunk preserved byte-for-byte, an ID3 blob, and
//! the coded-frame index. Chunk sizes cover the payload only, never the
//! id/size header; payloads are padded to even length but the size field
//! does not count the pad byte.
//!
//! Raw audio is stored MSB-first and channel-interleaved per byte, which is
//! the workspace-canonical layout, so `read_audio`/`write_audio` move bytes
//! untouched.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use dsdmeta::{Marker, MarkerKind};

use crate::chunk::{
    self, check_declared_size, padded_len, read_u16_be, read_u32_be, read_u64_be, size_add,
    write_u16_be, write_u32_be, write_u64_be, FourCc, MAX_METADATA_SIZE,
};
use crate::dsf::frame_bytes;
use crate::error::FormatError;

const FRM8: FourCc = FourCc::new(b"FRM8");
const FORM_DSD: FourCc = FourCc::new(b"DSD ");
const FORM_DST: FourCc = FourCc::new(b"DST ");
const FVER: FourCc = FourCc::new(b"FVER");
const PROP: FourCc = FourCc::new(b"PROP");
const SND: FourCc = FourCc::new(b"SND ");
const FS: FourCc = FourCc::new(b"FS  ");
const CHNL: FourCc = FourCc::new(b"CHNL");
const CMPR: FourCc = FourCc::new(b"CMPR");
const COMT: FourCc = FourCc::new(b"COMT");
const DIIN: FourCc = FourCc::new(b"DIIN");
const EMID: FourCc = FourCc::new(b"EMID");
const DIAR: FourCc = FourCc::new(b"DIAR");
const DITI: FourCc = FourCc::new(b"DITI");
const MARK: FourCc = FourCc::new(b"MARK");
const MANF: FourCc = FourCc::new(b"MANF");
const ID3: FourCc = FourCc::new(b"ID3 ");
const FRTE: FourCc = FourCc::new(b"FRTE");
const DSTF: FourCc = FourCc::new(b"DSTF");
const DSTC: FourCc = FourCc::new(b"DSTC");
const DSTI: FourCc = FourCc::new(b"DSTI");

const FORMAT_VERSION: u32 = 0x0105_0000;

/// Coded frames per second of audio, fixed by the format.
pub const FRAME_RATE: u16 = 75;

/// Compression code of the sound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// `"DSD "`: raw one-bit audio.
    Dsd,
    /// `"DST "`: losslessly coded frames.
    Dst,
}

/// One timestamped comment from the `COMT` chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comment {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub kind: u16,
    pub reference: u16,
    pub text: String,
}

/// Metadata carried outside the sound data.
#[derive(Debug, Clone, Default)]
pub struct DsdiffMetadata {
    /// Disc artist (`DIAR`).
    pub artist: Option<String>,
    /// Disc title (`DITI`).
    pub title: Option<String>,
    /// Edited-master identifier (`EMID`), opaque bytes.
    pub edited_master_id: Option<Vec<u8>>,
    pub comments: Vec<Comment>,
    pub markers: Vec<Marker>,
    /// Manufacturer chunk payload, preserved byte-for-byte on read and
    /// written only when supplied explicitly.
    pub manufacturer: Option<Vec<u8>>,
    /// ID3 tag blob (`ID3 `).
    pub id3: Option<Vec<u8>>,
}

/// A coded frame pulled out of the `DST ` sound data.
#[derive(Debug, Clone)]
pub struct DstFrame {
    pub data: Vec<u8>,
    pub crc: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
    Modify,
}

/// A DSDIFF file in one of the three access modes.
pub struct DsdiffFile {
    file: File,
    mode: Mode,
    channels: u32,
    sample_rate: u32,
    compression: Compression,
    metadata: DsdiffMetadata,

    /// Payload region of the sound chunk.
    audio_offset: u64,
    audio_size: u64,
    /// End of the sound chunk including padding; metadata is rewritten
    /// from here in modify mode.
    audio_chunk_end: u64,

    frame_count: u32,
    frame_rate: u16,
    /// Absolute offsets of `DSTF` chunk headers, from `DSTI` or recorded
    /// while writing.
    index: Vec<u64>,

    /// Canonical byte position (uncompressed read).
    pos: u64,
    /// Sequential scan position inside the coded-frame region.
    scan_offset: u64,
    next_frame: u32,

    /// Offset of the sound chunk header (size back-patched at finalize).
    sound_chunk_offset: u64,
    frte_offset: u64,
    finalized: bool,
}

impl DsdiffFile {
    /// Create a new file for writing.
    pub fn create(
        path: impl AsRef<Path>,
        channels: u32,
        sample_rate: u32,
        compression: Compression,
    ) -> Result<Self, FormatError> {
        if channels == 0 || channels > 6 {
            return Err(FormatError::InvalidArg("channel count must be 1..=6"));
        }
        if sample_rate == 0 {
            return Err(FormatError::InvalidArg("sample rate must be non-zero"));
        }

        let mut file = File::create(path)?;

        chunk::write_fourcc(&mut file, FRM8)?;
        write_u64_be(&mut file, 0)?; // patched at finalize
        chunk::write_fourcc(
            &mut file,
            match compression {
                Compression::Dsd => FORM_DSD,
                Compression::Dst => FORM_DST,
            },
        )?;

        chunk::write_fourcc(&mut file, FVER)?;
        write_u64_be(&mut file, 4)?;
        write_u32_be(&mut file, FORMAT_VERSION)?;

        write_prop(&mut file, channels, sample_rate, compression)?;

        let sound_chunk_offset = file.stream_position()?;
        let mut frte_offset = 0;
        match compression {
            Compression::Dsd => {
                chunk::write_fourcc(&mut file, FORM_DSD)?;
                write_u64_be(&mut file, 0)?; // patched at finalize
            }
            Compression::Dst => {
                chunk::write_fourcc(&mut file, FORM_DST)?;
                write_u64_be(&mut file, 0)?; // patched at finalize
                frte_offset = file.stream_position()?;
                chunk::write_fourcc(&mut file, FRTE)?;
                write_u64_be(&mut file, 6)?;
                write_u32_be(&mut file, 0)?; // frame count, patched at finalize
                write_u16_be(&mut file, FRAME_RATE)?;
            }
        }
        let audio_offset = file.stream_position()?;

        Ok(DsdiffFile {
            file,
            mode: Mode::Write,
            channels,
            sample_rate,
            compression,
            metadata: DsdiffMetadata::default(),
            audio_offset,
            audio_size: 0,
            audio_chunk_end: 0,
            frame_count: 0,
            frame_rate: FRAME_RATE,
            index: Vec::new(),
            pos: 0,
            scan_offset: audio_offset,
            next_frame: 0,
            sound_chunk_offset,
            frte_offset,
            finalized: false,
        })
    }

    /// Open an existing file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let file = File::open(path)?;
        Self::parse(file, Mode::Read)
    }

    /// Open an existing file for metadata editing.
    pub fn modify(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::parse(file, Mode::Modify)
    }

    fn parse(mut file: File, mode: Mode) -> Result<Self, FormatError> {
        let real_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let magic = chunk::read_fourcc(&mut file)?;
        if magic != FRM8 {
            return Err(FormatError::InvalidFile("unknown top-level chunk"));
        }
        let form_size = check_declared_size(FRM8, read_u64_be(&mut file)?)?;
        if size_add(form_size, 12)? != real_len {
            return Err(FormatError::InvalidFile(
                "declared form size disagrees with the file length",
            ));
        }
        let form_type = chunk::read_fourcc(&mut file)?;
        let compression_hint = match form_type {
            FORM_DSD => Compression::Dsd,
            FORM_DST => Compression::Dst,
            _ => return Err(FormatError::InvalidFile("unknown form type")),
        };

        let mut version = None;
        let mut sample_rate = None;
        let mut channels = None;
        let mut compression = None;
        let mut metadata = DsdiffMetadata::default();
        let mut audio_offset = 0u64;
        let mut audio_size = 0u64;
        let mut audio_chunk_end = 0u64;
        let mut frame_count = 0u32;
        let mut frame_rate = FRAME_RATE;
        let mut index = Vec::new();

        let form_end = size_add(form_size, 12)?;
        let mut offset = 16u64;
        while offset < form_end {
            file.seek(SeekFrom::Start(offset))?;
            let id = chunk::read_fourcc(&mut file)?;
            let size = check_declared_size(id, read_u64_be(&mut file)?)?;
            let payload = size_add(offset, 12)?;
            let next = size_add(payload, padded_len(size))?;
            if next > form_end {
                return Err(FormatError::chunk(
                    id.to_string(),
                    "chunk extends past the end of the form",
                ));
            }

            match id {
                FVER => {
                    if size < 4 {
                        return Err(FormatError::chunk("FVER", "version chunk too small"));
                    }
                    version = Some(read_u32_be(&mut file)?);
                }
                PROP => {
                    let (rate, count, cmpr) = parse_prop(&mut file, payload, size)?;
                    sample_rate = Some(rate);
                    channels = Some(count);
                    compression = Some(cmpr);
                }
                FORM_DSD => {
                    audio_offset = payload;
                    audio_size = size;
                    audio_chunk_end = next;
                }
                FORM_DST => {
                    // FRTE leads the coded-frame region.
                    let sub = chunk::read_fourcc(&mut file)?;
                    if sub != FRTE {
                        return Err(FormatError::chunk("DST ", "missing FRTE chunk"));
                    }
                    let frte_size = read_u64_be(&mut file)?;
                    if frte_size < 6 {
                        return Err(FormatError::chunk("FRTE", "frame info chunk too small"));
                    }
                    frame_count = read_u32_be(&mut file)?;
                    frame_rate = read_u16_be(&mut file)?;
                    // FRTE header (12) plus its padded payload.
                    let frames_start = size_add(payload, 12 + padded_len(frte_size))?;
                    audio_offset = frames_start;
                    audio_size = size_add(payload, size)?.saturating_sub(frames_start);
                    audio_chunk_end = next;
                }
                DSTI => {
                    if size % 8 != 0 {
                        return Err(FormatError::chunk("DSTI", "index size not a multiple of 8"));
                    }
                    let entries = size / 8;
                    for _ in 0..entries {
                        index.push(read_u64_be(&mut file)?);
                    }
                }
                COMT => {
                    metadata.comments = parse_comments(&mut file, size)?;
                }
                DIIN => {
                    parse_diin(&mut file, payload, size, &mut metadata, sample_rate)?;
                }
                MANF => {
                    if size > MAX_METADATA_SIZE {
                        return Err(FormatError::chunk("MANF", "manufacturer chunk too large"));
                    }
                    metadata.manufacturer = Some(chunk::read_vec(&mut file, size as usize)?);
                }
                ID3 => {
                    if size > MAX_METADATA_SIZE {
                        return Err(FormatError::chunk("ID3 ", "tag blob too large"));
                    }
                    metadata.id3 = Some(chunk::read_vec(&mut file, size as usize)?);
                }
                other => {
                    // Local recovery: unknown non-required chunks are skipped.
                    warn!(chunk = %other, size, "skipping unknown DSDIFF chunk");
                }
            }
            offset = next;
        }

        match version {
            Some(v) if v >> 24 == 1 => {}
            Some(_) => return Err(FormatError::chunk("FVER", "unsupported format version")),
            None => return Err(FormatError::InvalidFile("missing FVER chunk")),
        }
        let sample_rate =
            sample_rate.ok_or(FormatError::InvalidFile("missing sample rate property"))?;
        let channels =
            channels.ok_or(FormatError::InvalidFile("missing channel property"))?;
        let compression =
            compression.ok_or(FormatError::InvalidFile("missing compression property"))?;
        if compression != compression_hint {
            return Err(FormatError::InvalidFile(
                "compression property disagrees with the form type",
            ));
        }
        if audio_chunk_end == 0 {
            return Err(FormatError::InvalidFile("missing sound data chunk"));
        }

        debug!(
            channels,
            sample_rate,
            ?compression,
            audio_size,
            frame_count,
            markers = metadata.markers.len(),
            "opened DSDIFF container"
        );

        Ok(DsdiffFile {
            file,
            mode,
            channels,
            sample_rate,
            compression,
            metadata,
            audio_offset,
            audio_size,
            audio_chunk_end,
            frame_count,
            frame_rate,
            index,
            pos: 0,
            scan_offset: audio_offset,
            next_frame: 0,
            sound_chunk_offset: 0,
            frte_offset: 0,
            finalized: false,
        })
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Coded frames in the sound data (compressed form only).
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn frame_rate(&self) -> u16 {
        self.frame_rate
    }

    pub fn has_index(&self) -> bool {
        !self.index.is_empty()
    }

    pub fn metadata(&self) -> &DsdiffMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> Result<&mut DsdiffMetadata, FormatError> {
        if self.mode == Mode::Read {
            return Err(FormatError::InvalidState(
                "metadata edit on a read-only file",
            ));
        }
        Ok(&mut self.metadata)
    }

    /// Raw audio bytes available (uncompressed form).
    pub fn audio_len(&self) -> u64 {
        self.audio_size
    }

    /// Canonical bytes in one one-bit frame across all channels.
    pub fn frame_bytes(&self) -> Result<u64, FormatError> {
        frame_bytes(self.sample_rate, self.channels)
    }

    /// Whole one-bit frames in the uncompressed payload.
    pub fn total_frames(&self) -> Result<u64, FormatError> {
        match self.compression {
            Compression::Dsd => Ok(self.audio_size / self.frame_bytes()?),
            Compression::Dst => Ok(self.frame_count as u64),
        }
    }

    /// Read canonical audio bytes (uncompressed form).
    pub fn read_audio(&mut self, buf: &mut [u8]) -> Result<usize, FormatError> {
        if self.mode == Mode::Write {
            return Err(FormatError::InvalidState("read_audio on a write-mode file"));
        }
        if self.compression != Compression::Dsd {
            return Err(FormatError::InvalidState(
                "read_audio on a compressed container",
            ));
        }
        let remaining = self.audio_size.saturating_sub(self.pos);
        let want = (buf.len() as u64).min(remaining) as usize;
        self.file.seek(SeekFrom::Start(self.audio_offset + self.pos))?;
        self.file.read_exact(&mut buf[..want]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FormatError::UnexpectedEof
            } else {
                FormatError::Io(e)
            }
        })?;
        self.pos += want as u64;
        Ok(want)
    }

    /// Append canonical audio bytes (uncompressed form).
    pub fn write_audio(&mut self, buf: &[u8]) -> Result<usize, FormatError> {
        self.check_writable()?;
        if self.compression != Compression::Dsd {
            return Err(FormatError::InvalidState(
                "write_audio on a compressed container",
            ));
        }
        self.file
            .seek(SeekFrom::Start(self.audio_offset + self.audio_size))?;
        self.file.write_all(buf)?;
        self.audio_size += buf.len() as u64;
        Ok(buf.len())
    }

    /// Append one coded frame, recording it in the index.
    pub fn write_dst_frame(&mut self, frame: &[u8], crc: Option<&[u8]>) -> Result<(), FormatError> {
        self.check_writable()?;
        if self.compression != Compression::Dst {
            return Err(FormatError::InvalidState(
                "write_dst_frame on an uncompressed container",
            ));
        }
        let offset = self.audio_offset + self.audio_size;
        self.file.seek(SeekFrom::Start(offset))?;

        chunk::write_fourcc(&mut self.file, DSTF)?;
        write_u64_be(&mut self.file, frame.len() as u64)?;
        self.file.write_all(frame)?;
        let mut written = 12 + padded_len(frame.len() as u64);
        if frame.len() % 2 != 0 {
            self.file.write_all(&[0])?;
        }
        if let Some(crc) = crc {
            chunk::write_fourcc(&mut self.file, DSTC)?;
            write_u64_be(&mut self.file, crc.len() as u64)?;
            self.file.write_all(crc)?;
            if crc.len() % 2 != 0 {
                self.file.write_all(&[0])?;
            }
            written += 12 + padded_len(crc.len() as u64);
        }

        self.index.push(offset);
        self.audio_size += written;
        self.frame_count += 1;
        Ok(())
    }

    /// Read the next coded frame in sequence, `None` at the end.
    pub fn read_dst_frame(&mut self) -> Result<Option<DstFrame>, FormatError> {
        if self.mode == Mode::Write {
            return Err(FormatError::InvalidState("read on a write-mode file"));
        }
        if self.compression != Compression::Dst {
            return Err(FormatError::InvalidState(
                "read_dst_frame on an uncompressed container",
            ));
        }
        let region_end = self.audio_offset + self.audio_size;
        loop {
            if self.scan_offset >= region_end || self.next_frame >= self.frame_count {
                return Ok(None);
            }
            self.file.seek(SeekFrom::Start(self.scan_offset))?;
            let id = chunk::read_fourcc(&mut self.file)?;
            let size = check_declared_size(id, read_u64_be(&mut self.file)?)?;
            let next = size_add(self.scan_offset, size_add(12, padded_len(size))?)?;
            match id {
                DSTF => {
                    let data = chunk::read_vec(&mut self.file, size as usize)?;
                    self.scan_offset = next;
                    // An optional CRC block follows its frame.
                    let crc = if self.scan_offset < region_end {
                        self.file.seek(SeekFrom::Start(self.scan_offset))?;
                        let peek = chunk::read_fourcc(&mut self.file)?;
                        if peek == DSTC {
                            let crc_size =
                                check_declared_size(peek, read_u64_be(&mut self.file)?)?;
                            let crc = chunk::read_vec(&mut self.file, crc_size as usize)?;
                            self.scan_offset =
                                size_add(self.scan_offset, size_add(12, padded_len(crc_size))?)?;
                            Some(crc)
                        } else {
                            None
                        }
                    } else {
                        None
                    };
                    self.next_frame += 1;
                    return Ok(Some(DstFrame { data, crc }));
                }
                DSTC => {
                    // CRC without a preceding frame read; skip it.
                    self.scan_offset = next;
                }
                other => {
                    return Err(FormatError::chunk(
                        other.to_string(),
                        "unexpected chunk in the coded-frame region",
                    ));
                }
            }
        }
    }

    /// Seek to a coded frame. Requires the index chunk.
    pub fn seek_coded_frames(&mut self, pos: SeekFrom) -> Result<u32, FormatError> {
        if self.compression != Compression::Dst {
            return Err(FormatError::InvalidState(
                "coded-frame seek on an uncompressed container",
            ));
        }
        // Rewinding to the first frame is always possible; anything else
        // needs the index chunk.
        if self.index.is_empty() && pos != SeekFrom::Start(0) {
            return Err(FormatError::InvalidState(
                "random access requires the frame index chunk",
            ));
        }
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => self.next_frame as i128 + d as i128,
            SeekFrom::End(d) => self.frame_count as i128 + d as i128,
        };
        if target < 0 || target > self.frame_count as i128 {
            return Err(FormatError::InvalidArg("seek target out of range"));
        }
        let target = target as u32;
        self.next_frame = target;
        self.scan_offset = if target == 0 {
            self.audio_offset
        } else if target == self.frame_count {
            self.audio_offset + self.audio_size
        } else {
            self.index[target as usize]
        };
        Ok(target)
    }

    /// Seek in one-bit-frame units (uncompressed form).
    pub fn seek_frames(&mut self, pos: SeekFrom) -> Result<u64, FormatError> {
        if self.mode == Mode::Write {
            return Err(FormatError::InvalidState("seek on a write-mode file"));
        }
        if self.compression != Compression::Dsd {
            return Err(FormatError::InvalidState(
                "one-bit-frame seek on a compressed container",
            ));
        }
        let frame_len = self.frame_bytes()?;
        let total = self.total_frames()?;
        let current = self.pos / frame_len;
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(d) => current as i128 + d as i128,
            SeekFrom::End(d) => total as i128 + d as i128,
        };
        if target < 0 || target > total as i128 {
            return Err(FormatError::InvalidArg("seek target out of range"));
        }
        self.pos = target as u64 * frame_len;
        Ok(target as u64)
    }

    fn check_writable(&self) -> Result<(), FormatError> {
        if self.mode != Mode::Write {
            return Err(FormatError::InvalidState("write on a read-mode file"));
        }
        if self.finalized {
            return Err(FormatError::InvalidState("write after finalize"));
        }
        Ok(())
    }

    /// Write pending metadata chunks and back-patch every size field.
    pub fn finalize(&mut self) -> Result<(), FormatError> {
        match self.mode {
            Mode::Read => {
                return Err(FormatError::InvalidState("finalize on a read-only file"))
            }
            Mode::Write => {
                if self.finalized {
                    return Err(FormatError::InvalidState("finalize called twice"));
                }
                // Sound payload must end even; the size field keeps the
                // true length.
                let sound_payload = self.sound_payload_size();
                if sound_payload % 2 != 0 {
                    self.file
                        .seek(SeekFrom::Start(self.audio_offset + self.audio_size))?;
                    self.file.write_all(&[0])?;
                }
                self.audio_chunk_end =
                    self.sound_chunk_offset + 12 + padded_len(sound_payload);
            }
            Mode::Modify => {
                self.file.set_len(self.audio_chunk_end)?;
            }
        }

        self.file.seek(SeekFrom::Start(self.audio_chunk_end))?;
        if self.compression == Compression::Dst && !self.index.is_empty() {
            write_index(&mut self.file, &self.index)?;
        }
        write_metadata_chunks(&mut self.file, &self.metadata, self.sample_rate)?;
        let end = self.file.stream_position()?;
        self.file.set_len(end)?;

        // Back-patch the form and sound sizes.
        self.file.seek(SeekFrom::Start(4))?;
        write_u64_be(&mut self.file, end - 12)?;
        if self.mode == Mode::Write {
            self.file.seek(SeekFrom::Start(self.sound_chunk_offset + 4))?;
            let sound_payload_size = self.sound_payload_size();
            write_u64_be(&mut self.file, sound_payload_size)?;
            if self.compression == Compression::Dst {
                self.file.seek(SeekFrom::Start(self.frte_offset + 12))?;
                write_u32_be(&mut self.file, self.frame_count)?;
            }
        }
        self.file.flush()?;
        self.finalized = true;
        debug!(total = end, frames = self.frame_count, "finalized DSDIFF container");
        Ok(())
    }

    fn sound_payload_size(&self) -> u64 {
        match self.compression {
            Compression::Dsd => self.audio_size,
            // FRTE chunk (12-byte header + 6-byte payload) leads the
            // coded-frame region.
            Compression::Dst => 12 + 6 + self.audio_size,
        }
    }

    pub fn close(self) -> Result<(), FormatError> {
        if self.mode == Mode::Write && !self.finalized {
            warn!("DSDIFF file closed without finalize; size fields are stale");
        }
        if self.mode != Mode::Read {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

fn channel_ids(channels: u32) -> Vec<FourCc> {
    match channels {
        1 => vec![FourCc::new(b"C   ")],
        2 => vec![FourCc::new(b"SLFT"), FourCc::new(b"SRGT")],
        3 => vec![
            FourCc::new(b"SLFT"),
            FourCc::new(b"SRGT"),
            FourCc::new(b"C   "),
        ],
        4 => vec![
            FourCc::new(b"MLFT"),
            FourCc::new(b"MRGT"),
            FourCc::new(b"LS  "),
            FourCc::new(b"RS  "),
        ],
        5 => vec![
            FourCc::new(b"MLFT"),
            FourCc::new(b"MRGT"),
            FourCc::new(b"C   "),
            FourCc::new(b"LS  "),
            FourCc::new(b"RS  "),
        ],
        _ => vec![
            FourCc::new(b"MLFT"),
            FourCc::new(b"MRGT"),
            FourCc::new(b"C   "),
            FourCc::new(b"LFE "),
            FourCc::new(b"LS  "),
            FourCc::new(b"RS  "),
        ],
    }
}

fn write_prop(
    file: &mut File,
    channels: u32,
    sample_rate: u32,
    compression: Compression,
) -> Result<(), FormatError> {
    let (cmpr_id, cmpr_name) = match compression {
        Compression::Dsd => (FORM_DSD, "not compressed"),
        Compression::Dst => (FORM_DST, "DST Encoded"),
    };
    let cmpr_payload = 4 + 1 + cmpr_name.len() as u64;
    let chnl_payload = 2 + 4 * channels as u64;
    let prop_size = 4 // SND form type
        + 12 + 4 // FS
        + 12 + padded_len(chnl_payload)
        + 12 + padded_len(cmpr_payload);

    chunk::write_fourcc(file, PROP)?;
    write_u64_be(file, prop_size)?;
    chunk::write_fourcc(file, SND)?;

    chunk::write_fourcc(file, FS)?;
    write_u64_be(file, 4)?;
    write_u32_be(file, sample_rate)?;

    chunk::write_fourcc(file, CHNL)?;
    write_u64_be(file, chnl_payload)?;
    write_u16_be(file, channels as u16)?;
    for id in channel_ids(channels) {
        chunk::write_fourcc(file, id)?;
    }
    if chnl_payload % 2 != 0 {
        file.write_all(&[0])?;
    }

    chunk::write_fourcc(file, CMPR)?;
    write_u64_be(file, cmpr_payload)?;
    chunk::write_fourcc(file, cmpr_id)?;
    file.write_all(&[cmpr_name.len() as u8])?;
    file.write_all(cmpr_name.as_bytes())?;
    if cmpr_payload % 2 != 0 {
        file.write_all(&[0])?;
    }
    Ok(())
}

fn parse_prop(
    file: &mut File,
    payload: u64,
    size: u64,
) -> Result<(u32, u32, Compression), FormatError> {
    let end = size_add(payload, size)?;
    if chunk::read_fourcc(file)? != SND {
        return Err(FormatError::chunk("PROP", "expected SND property form"));
    }

    let mut sample_rate = None;
    let mut channels = None;
    let mut compression = None;

    let mut offset = payload + 4;
    while offset < end {
        file.seek(SeekFrom::Start(offset))?;
        let id = chunk::read_fourcc(file)?;
        let sub_size = check_declared_size(id, read_u64_be(file)?)?;
        let next = size_add(offset, size_add(12, padded_len(sub_size))?)?;
        if next > end {
            return Err(FormatError::chunk(
                id.to_string(),
                "property chunk extends past the property form",
            ));
        }
        match id {
            FS => {
                if sub_size < 4 {
                    return Err(FormatError::chunk("FS  ", "sample rate chunk too small"));
                }
                sample_rate = Some(read_u32_be(file)?);
            }
            CHNL => {
                if sub_size < 2 {
                    return Err(FormatError::chunk("CHNL", "channel chunk too small"));
                }
                let count = read_u16_be(file)? as u32;
                if count == 0 || count > 6 {
                    return Err(FormatError::chunk("CHNL", "channel count out of range"));
                }
                if sub_size < 2 + 4 * count as u64 {
                    return Err(FormatError::chunk("CHNL", "missing channel identifiers"));
                }
                channels = Some(count);
            }
            CMPR => {
                if sub_size < 4 {
                    return Err(FormatError::chunk("CMPR", "compression chunk too small"));
                }
                compression = Some(match chunk::read_fourcc(file)? {
                    FORM_DSD => Compression::Dsd,
                    FORM_DST => Compression::Dst,
                    _ => {
                        return Err(FormatError::chunk("CMPR", "unknown compression type"));
                    }
                });
            }
            other => {
                warn!(chunk = %other, "skipping unknown property chunk");
            }
        }
        offset = next;
    }

    let sample_rate = sample_rate.ok_or(FormatError::chunk("PROP", "missing FS chunk"))?;
    let channels = channels.ok_or(FormatError::chunk("PROP", "missing CHNL chunk"))?;
    let compression = compression.ok_or(FormatError::chunk("PROP", "missing CMPR chunk"))?;
    if sample_rate == 0 {
        return Err(FormatError::chunk("FS  ", "sample rate must be non-zero"));
    }
    Ok((sample_rate, channels, compression))
}

fn parse_comments(file: &mut File, size: u64) -> Result<Vec<Comment>, FormatError> {
    if size < 2 {
        return Err(FormatError::chunk("COMT", "comment chunk too small"));
    }
    let count = read_u16_be(file)?;
    let mut comments = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let year = read_u16_be(file)?;
        let stamp = chunk::read_bytes::<4>(file)?;
        let kind = read_u16_be(file)?;
        let reference = read_u16_be(file)?;
        let text_len = read_u32_be(file)?;
        if text_len as u64 > MAX_METADATA_SIZE {
            return Err(FormatError::chunk("COMT", "comment text too large"));
        }
        let raw = chunk::read_vec(file, text_len as usize)?;
        if text_len % 2 != 0 {
            chunk::read_bytes::<1>(file)?;
        }
        // Comment text is ASCII by contract; be permissive on read.
        let text = String::from_utf8_lossy(&raw).into_owned();
        comments.push(Comment {
            year,
            month: stamp[0],
            day: stamp[1],
            hour: stamp[2],
            minute: stamp[3],
            kind,
            reference,
            text,
        });
    }
    Ok(comments)
}

fn parse_diin(
    file: &mut File,
    payload: u64,
    size: u64,
    metadata: &mut DsdiffMetadata,
    sample_rate: Option<u32>,
) -> Result<(), FormatError> {
    let end = size_add(payload, size)?;
    let mut offset = payload;
    while offset < end {
        file.seek(SeekFrom::Start(offset))?;
        let id = chunk::read_fourcc(file)?;
        let sub_size = check_declared_size(id, read_u64_be(file)?)?;
        let next = size_add(offset, size_add(12, padded_len(sub_size))?)?;
        if next > end {
            return Err(FormatError::chunk(
                id.to_string(),
                "detail chunk extends past the detail form",
            ));
        }
        match id {
            EMID => {
                metadata.edited_master_id = Some(chunk::read_vec(file, sub_size as usize)?);
            }
            DIAR => {
                metadata.artist = Some(read_counted_text(file, sub_size)?);
            }
            DITI => {
                metadata.title = Some(read_counted_text(file, sub_size)?);
            }
            MARK => {
                let hours = read_u16_be(file)? as u64;
                let stamp = chunk::read_bytes::<2>(file)?;
                let samples = read_u32_be(file)? as u64;
                let _offset = read_u32_be(file)?;
                let mark_type = read_u16_be(file)?;
                let _channel = read_u16_be(file)?;
                let _flags = read_u16_be(file)?;
                let text_len = read_u32_be(file)?;
                let text = if text_len > 0 {
                    Some(String::from_utf8_lossy(&chunk::read_vec(file, text_len as usize)?).into_owned())
                } else {
                    None
                };
                let rate = sample_rate.unwrap_or(0) as u64;
                let offset_samples =
                    (hours * 3600 + stamp[0] as u64 * 60 + stamp[1] as u64) * rate + samples;
                metadata.markers.push(Marker {
                    offset_samples,
                    kind: match mark_type {
                        0 => MarkerKind::TrackStart,
                        1 => MarkerKind::TrackStop,
                        _ => MarkerKind::Index,
                    },
                    text,
                });
            }
            other => {
                warn!(chunk = %other, "skipping unknown detail chunk");
            }
        }
        offset = next;
    }
    Ok(())
}

fn read_counted_text(file: &mut File, size: u64) -> Result<String, FormatError> {
    if size < 4 {
        return Err(FormatError::chunk("DIAR", "text chunk too small"));
    }
    let len = read_u32_be(file)?;
    if len as u64 > size - 4 {
        return Err(FormatError::chunk("DIAR", "text length exceeds chunk"));
    }
    Ok(String::from_utf8_lossy(&chunk::read_vec(file, len as usize)?).into_owned())
}

fn write_index(file: &mut File, index: &[u64]) -> Result<(), FormatError> {
    chunk::write_fourcc(file, DSTI)?;
    write_u64_be(file, index.len() as u64 * 8)?;
    for &offset in index {
        write_u64_be(file, offset)?;
    }
    Ok(())
}

fn marker_payload(marker: &Marker, sample_rate: u32) -> Vec<u8> {
    let rate = sample_rate.max(1) as u64;
    let total_seconds = marker.offset_samples / rate;
    let samples = (marker.offset_samples % rate) as u32;
    let text = marker.text.as_deref().unwrap_or("");

    let mut payload = Vec::with_capacity(20 + text.len());
    payload.extend_from_slice(&((total_seconds / 3600) as u16).to_be_bytes());
    payload.push(((total_seconds / 60) % 60) as u8);
    payload.push((total_seconds % 60) as u8);
    payload.extend_from_slice(&samples.to_be_bytes());
    payload.extend_from_slice(&0i32.to_be_bytes());
    let mark_type: u16 = match marker.kind {
        MarkerKind::TrackStart => 0,
        MarkerKind::TrackStop => 1,
        MarkerKind::Index => 2,
    };
    payload.extend_from_slice(&mark_type.to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes()); // channel: all
    payload.extend_from_slice(&0u16.to_be_bytes()); // flags
    payload.extend_from_slice(&(text.len() as u32).to_be_bytes());
    payload.extend_from_slice(text.as_bytes());
    payload
}

fn write_metadata_chunks(
    file: &mut File,
    metadata: &DsdiffMetadata,
    sample_rate: u32,
) -> Result<(), FormatError> {
    if !metadata.comments.is_empty() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(metadata.comments.len() as u16).to_be_bytes());
        for comment in &metadata.comments {
            payload.extend_from_slice(&comment.year.to_be_bytes());
            payload.push(comment.month);
            payload.push(comment.day);
            payload.push(comment.hour);
            payload.push(comment.minute);
            payload.extend_from_slice(&comment.kind.to_be_bytes());
            payload.extend_from_slice(&comment.reference.to_be_bytes());
            payload.extend_from_slice(&(comment.text.len() as u32).to_be_bytes());
            payload.extend_from_slice(comment.text.as_bytes());
            if comment.text.len() % 2 != 0 {
                payload.push(0);
            }
        }
        chunk::write_fourcc(file, COMT)?;
        write_u64_be(file, payload.len() as u64)?;
        file.write_all(&payload)?;
        if payload.len() % 2 != 0 {
            file.write_all(&[0])?;
        }
    }

    let has_diin = metadata.edited_master_id.is_some()
        || metadata.artist.is_some()
        || metadata.title.is_some()
        || !metadata.markers.is_empty();
    if has_diin {
        let mut inner: Vec<u8> = Vec::new();
        if let Some(emid) = &metadata.edited_master_id {
            inner.extend_from_slice(&EMID.0);
            inner.extend_from_slice(&(emid.len() as u64).to_be_bytes());
            inner.extend_from_slice(emid);
            if emid.len() % 2 != 0 {
                inner.push(0);
            }
        }
        if let Some(artist) = &metadata.artist {
            push_counted_text(&mut inner, DIAR, artist);
        }
        if let Some(title) = &metadata.title {
            push_counted_text(&mut inner, DITI, title);
        }
        for marker in &metadata.markers {
            let payload = marker_payload(marker, sample_rate);
            inner.extend_from_slice(&MARK.0);
            inner.extend_from_slice(&(payload.len() as u64).to_be_bytes());
            inner.extend_from_slice(&payload);
            if payload.len() % 2 != 0 {
                inner.push(0);
            }
        }
        chunk::write_fourcc(file, DIIN)?;
        write_u64_be(file, inner.len() as u64)?;
        file.write_all(&inner)?;
        // Children are padded individually, so the payload is already even.
    }

    if let Some(manufacturer) = &metadata.manufacturer {
        chunk::write_fourcc(file, MANF)?;
        write_u64_be(file, manufacturer.len() as u64)?;
        file.write_all(manufacturer)?;
        if manufacturer.len() % 2 != 0 {
            file.write_all(&[0])?;
        }
    }

    if let Some(id3) = &metadata.id3 {
        chunk::write_fourcc(file, ID3)?;
        write_u64_be(file, id3.len() as u64)?;
        file.write_all(id3)?;
        if id3.len() % 2 != 0 {
            file.write_all(&[0])?;
        }
    }
    Ok(())
}

fn push_counted_text(out: &mut Vec<u8>, id: FourCc, text: &str) {
    let payload = 4 + text.len() as u64;
    out.extend_from_slice(&id.0);
    out.extend_from_slice(&payload.to_be_bytes());
    out.extend_from_slice(&(text.len() as u32).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    if payload % 2 != 0 {
        out.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        tempfile::tempdir().unwrap().keep().join(name)
    }

    #[test]
    fn raw_write_then_read_round_trips() {
        let path = temp_path("roundtrip.dff");
        let data: Vec<u8> = (0..9408u32).map(|i| (i % 251) as u8).collect();

        let mut writer = DsdiffFile::create(&path, 2, 2_822_400, Compression::Dsd).unwrap();
        writer.write_audio(&data).unwrap();
        writer.metadata_mut().unwrap().artist = Some("Test Artist".into());
        writer.metadata_mut().unwrap().title = Some("Test Title".into());
        writer.finalize().unwrap();
        writer.close().unwrap();

        let mut reader = DsdiffFile::open(&path).unwrap();
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.sample_rate(), 2_822_400);
        assert_eq!(reader.compression(), Compression::Dsd);
        assert_eq!(reader.audio_len(), data.len() as u64);
        assert_eq!(reader.metadata().artist.as_deref(), Some("Test Artist"));
        assert_eq!(reader.metadata().title.as_deref(), Some("Test Title"));

        let mut back = vec![0u8; data.len()];
        assert_eq!(reader.read_audio(&mut back).unwrap(), data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn coded_frames_round_trip_with_index() {
        let path = temp_path("frames.dff");
        let mut writer = DsdiffFile::create(&path, 2, 2_822_400, Compression::Dst).unwrap();
        for i in 0..10u8 {
            let frame = vec![i; 100 + i as usize];
            let crc = [i, i ^ 0xFF, 0x12, 0x34];
            writer.write_dst_frame(&frame, Some(&crc)).unwrap();
        }
        writer.finalize().unwrap();
        writer.close().unwrap();

        let mut reader = DsdiffFile::open(&path).unwrap();
        assert_eq!(reader.frame_count(), 10);
        assert_eq!(reader.frame_rate(), FRAME_RATE);
        assert!(reader.has_index());

        let mut frames = Vec::new();
        while let Some(frame) = reader.read_dst_frame().unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 10);
        assert_eq!(frames[3].data, vec![3u8; 103]);
        assert_eq!(frames[3].crc.as_deref(), Some(&[3, 0xFC, 0x12, 0x34][..]));

        // Random access through the index.
        reader.seek_coded_frames(SeekFrom::Start(7)).unwrap();
        let frame = reader.read_dst_frame().unwrap().unwrap();
        assert_eq!(frame.data, vec![7u8; 107]);
    }

    #[test]
    fn markers_round_trip_in_sample_units() {
        let path = temp_path("markers.dff");
        let rate = 2_822_400u32;
        let mut writer = DsdiffFile::create(&path, 2, rate, Compression::Dsd).unwrap();
        writer.write_audio(&[0u8; 9408]).unwrap();
        let offsets = [0u64, rate as u64 * 61 + 1234, rate as u64 * 3601 + 7];
        for &offset in &offsets {
            writer
                .metadata_mut()
                .unwrap()
                .markers
                .push(Marker::track_start(offset, Some("T".into())));
        }
        writer.finalize().unwrap();
        writer.close().unwrap();

        let reader = DsdiffFile::open(&path).unwrap();
        let read_back: Vec<u64> = reader
            .metadata()
            .markers
            .iter()
            .map(|m| m.offset_samples)
            .collect();
        assert_eq!(read_back, offsets);
        assert!(reader
            .metadata()
            .markers
            .iter()
            .all(|m| m.kind == MarkerKind::TrackStart));
    }

    #[test]
    fn form_size_mismatch_is_rejected() {
        let path = temp_path("lying.dff");
        let mut writer = DsdiffFile::create(&path, 2, 2_822_400, Compression::Dsd).unwrap();
        writer.write_audio(&[0u8; 512]).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(4)).unwrap();
        let real = std::fs::metadata(&path).unwrap().len();
        file.write_all(&(real + 2).to_be_bytes()).unwrap();
        drop(file);

        assert!(matches!(
            DsdiffFile::open(&path),
            Err(FormatError::InvalidFile(_))
        ));
    }

    #[test]
    fn manufacturer_chunk_is_preserved() {
        let path = temp_path("manf.dff");
        let mut writer = DsdiffFile::create(&path, 2, 2_822_400, Compression::Dsd).unwrap();
        writer.write_audio(&[0u8; 128]).unwrap();
        writer.metadata_mut().unwrap().manufacturer = Some(b"MFR0data\x01\x02\x03".to_vec());
        writer.finalize().unwrap();
        writer.close().unwrap();

        let reader = DsdiffFile::open(&path).unwrap();
        assert_eq!(
            reader.metadata().manufacturer.as_deref(),
            Some(&b"MFR0data\x01\x02\x03"[..])
        );
    }

    #[test]
    fn modify_rewrites_metadata_without_touching_audio() {
        let path = temp_path("modify.dff");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 7) as u8).collect();
        let mut writer = DsdiffFile::create(&path, 2, 2_822_400, Compression::Dsd).unwrap();
        writer.write_audio(&data).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let mut editor = DsdiffFile::modify(&path).unwrap();
        editor.metadata_mut().unwrap().title = Some("New Title".into());
        editor.finalize().unwrap();
        editor.close().unwrap();

        let mut reader = DsdiffFile::open(&path).unwrap();
        assert_eq!(reader.metadata().title.as_deref(), Some("New Title"));
        let mut back = vec![0u8; data.len()];
        reader.read_audio(&mut back).unwrap();
        assert_eq!(back, data);
    }
}
