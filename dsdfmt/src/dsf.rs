//! DSF container codec (the little-endian, per-track format).
//!
//! Layout is three fixed chunks (28-byte header, 52-byte format, 12-byte
//! data header) followed by the audio payload and an optional trailing tag
//! blob whose offset lives in the header chunk. Audio sits in 4096-byte
//! per-channel blocks round-robined across channels, LSB-first in the
//! 1-bit form and MSB-first in the byte form.
//!
//! The audio API on this type speaks the workspace-canonical layout instead:
//! channel-interleaved bytes, MSB-first. The codec reverses bit order and
//! (de)interleaves blocks at its boundary, so a byte read here compares
//! directly against a byte read from the big-endian container.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::chunk::{
    self, bit_reverse, check_declared_size, read_u32_le, read_u64_le, size_add, size_mul, FourCc,
    MAX_METADATA_SIZE,
};
use crate::error::FormatError;

const HEADER_MAGIC: FourCc = FourCc::new(b"DSD ");
const FORMAT_MAGIC: FourCc = FourCc::new(b"fmt ");
const DATA_MAGIC: FourCc = FourCc::new(b"data");

const HEADER_CHUNK_SIZE: u64 = 28;
const FORMAT_CHUNK_SIZE: u64 = 52;
const DATA_HEADER_SIZE: u64 = 12;
const AUDIO_START: u64 = HEADER_CHUNK_SIZE + FORMAT_CHUNK_SIZE + DATA_HEADER_SIZE;

/// Per-channel block interleave size, fixed by the format.
pub const BLOCK_SIZE: u64 = 4096;

/// Open-time slack allowed between the declared total size and the real
/// file length.
const FILE_SIZE_TOLERANCE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
    Modify,
}

/// A DSF file in one of the three access modes.
pub struct DsfFile {
    file: File,
    mode: Mode,
    channels: u32,
    sample_rate: u32,
    bits_per_sample: u32,
    /// Samples per channel, authoritative after finalize.
    sample_count: u64,
    /// Audio payload bytes, always a whole number of block rows.
    audio_bytes: u64,
    tag_offset: u64,
    metadata_blob: Option<Vec<u8>>,
    metadata_dirty: bool,
    /// Canonical read position in bytes.
    pos: u64,
    row_cache: Vec<u8>,
    cached_row: Option<u64>,
    /// Write staging, one buffer per channel, flushed a block row at a time.
    staged: Vec<Vec<u8>>,
    written_bytes: u64,
    finalized: bool,
}

impl DsfFile {
    /// Create a new file for writing.
    pub fn create(
        path: impl AsRef<Path>,
        channels: u32,
        sample_rate: u32,
        bits_per_sample: u32,
    ) -> Result<Self, FormatError> {
        if channels == 0 || channels > 6 {
            return Err(FormatError::InvalidArg("channel count must be 1..=6"));
        }
        if sample_rate == 0 {
            return Err(FormatError::InvalidArg("sample rate must be non-zero"));
        }
        if bits_per_sample != 1 && bits_per_sample != 8 {
            return Err(FormatError::InvalidArg("bits per sample must be 1 or 8"));
        }

        let mut file = File::create(path)?;
        write_fixed_header(&mut file, channels, sample_rate, bits_per_sample, 0, 0, 0)?;

        Ok(DsfFile {
            file,
            mode: Mode::Write,
            channels,
            sample_rate,
            bits_per_sample,
            sample_count: 0,
            audio_bytes: 0,
            tag_offset: 0,
            metadata_blob: None,
            metadata_dirty: false,
            pos: 0,
            row_cache: Vec::new(),
            cached_row: None,
            staged: (0..channels).map(|_| Vec::new()).collect(),
            written_bytes: 0,
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

        // Header chunk. All size validation happens on these 92 bytes
        // before any payload-sized allocation.
        let magic = chunk::read_fourcc(&mut file)?;
        if magic != HEADER_MAGIC {
            return Err(FormatError::InvalidFile("missing DSD header magic"));
        }
        if read_u64_le(&mut file)? != HEADER_CHUNK_SIZE {
            return Err(FormatError::chunk("DSD ", "header chunk size must be 28"));
        }
        let total_file_size = read_u64_le(&mut file)?;
        let tag_offset = read_u64_le(&mut file)?;

        if total_file_size < AUDIO_START
            || total_file_size.abs_diff(real_len) > FILE_SIZE_TOLERANCE
        {
            return Err(FormatError::InvalidFile(
                "declared total size disagrees with the file length",
            ));
        }

        // Format chunk.
        if chunk::read_fourcc(&mut file)? != FORMAT_MAGIC {
            return Err(FormatError::InvalidFile("missing fmt chunk"));
        }
        if read_u64_le(&mut file)? != FORMAT_CHUNK_SIZE {
            return Err(FormatError::chunk("fmt ", "format chunk size must be 52"));
        }
        if read_u32_le(&mut file)? != 1 {
            return Err(FormatError::chunk("fmt ", "unsupported format version"));
        }
        if read_u32_le(&mut file)? != 0 {
            return Err(FormatError::chunk("fmt ", "unsupported format id"));
        }
        let _channel_type = read_u32_le(&mut file)?;
        let channels = read_u32_le(&mut file)?;
        let sample_rate = read_u32_le(&mut file)?;
        let bits_per_sample = read_u32_le(&mut file)?;
        let sample_count = read_u64_le(&mut file)?;
        let block_size = read_u32_le(&mut file)?;
        let _reserved = read_u32_le(&mut file)?;

        if channels == 0 || channels > 6 {
            return Err(FormatError::chunk("fmt ", "channel count out of range"));
        }
        if sample_rate == 0 {
            return Err(FormatError::chunk("fmt ", "sample rate must be non-zero"));
        }
        if bits_per_sample != 1 && bits_per_sample != 8 {
            return Err(FormatError::chunk("fmt ", "bits per sample must be 1 or 8"));
        }
        if block_size as u64 != BLOCK_SIZE {
            return Err(FormatError::chunk("fmt ", "block size must be 4096"));
        }

        // Data chunk header.
        if chunk::read_fourcc(&mut file)? != DATA_MAGIC {
            return Err(FormatError::InvalidFile("missing data chunk"));
        }
        let data_size = check_declared_size(DATA_MAGIC, read_u64_le(&mut file)?)?;
        let audio_bytes = data_size
            .checked_sub(DATA_HEADER_SIZE)
            .ok_or(FormatError::chunk("data", "data chunk smaller than header"))?;

        let row = size_mul(channels as u64, BLOCK_SIZE)?;
        if audio_bytes % row != 0 {
            return Err(FormatError::InvalidFile(
                "audio bytes are not a whole number of block rows",
            ));
        }
        if size_add(AUDIO_START, audio_bytes)? > real_len {
            return Err(FormatError::InvalidFile("audio payload exceeds file length"));
        }

        let bytes_per_channel = audio_bytes / channels as u64;
        let declared_bytes = sample_count.div_ceil(8);
        if declared_bytes > bytes_per_channel || bytes_per_channel - declared_bytes > BLOCK_SIZE {
            return Err(FormatError::InvalidFile(
                "sample count disagrees with the audio payload",
            ));
        }

        if tag_offset != 0 {
            if tag_offset < AUDIO_START || tag_offset > real_len {
                return Err(FormatError::InvalidFile("tag offset out of bounds"));
            }
            if real_len - tag_offset > MAX_METADATA_SIZE {
                return Err(FormatError::InvalidFile("metadata blob too large"));
            }
        }

        debug!(
            channels,
            sample_rate, bits_per_sample, sample_count, audio_bytes, "opened DSF container"
        );

        Ok(DsfFile {
            file,
            mode,
            channels,
            sample_rate,
            bits_per_sample,
            sample_count,
            audio_bytes,
            tag_offset,
            metadata_blob: None,
            metadata_dirty: false,
            pos: 0,
            row_cache: Vec::new(),
            cached_row: None,
            staged: Vec::new(),
            written_bytes: 0,
            finalized: false,
        })
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    /// Samples per channel.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Canonical audio bytes available for reading.
    pub fn audio_len(&self) -> u64 {
        self.audio_bytes
    }

    /// Canonical bytes in one one-bit frame (1/75 s across all channels).
    pub fn frame_bytes(&self) -> Result<u64, FormatError> {
        frame_bytes(self.sample_rate, self.channels)
    }

    /// Whole one-bit frames in the payload, by the authoritative sample count.
    pub fn total_frames(&self) -> Result<u64, FormatError> {
        let per_channel = self.sample_count.div_ceil(8);
        let row = frame_bytes(self.sample_rate, self.channels)? / self.channels as u64;
        Ok(per_channel / row)
    }

    /// Read canonical audio bytes at the current position.
    pub fn read_audio(&mut self, buf: &mut [u8]) -> Result<usize, FormatError> {
        if self.mode == Mode::Write {
            return Err(FormatError::InvalidState("read_audio on a write-mode file"));
        }

        let remaining = self.audio_bytes.saturating_sub(self.pos);
        let want = (buf.len() as u64).min(remaining) as usize;
        let row_len = self.channels as usize * BLOCK_SIZE as usize;

        let mut copied = 0;
        while copied < want {
            let row = self.pos / row_len as u64;
            let offset = (self.pos % row_len as u64) as usize;
            self.fill_row(row)?;
            let take = (row_len - offset).min(want - copied);
            buf[copied..copied + take].copy_from_slice(&self.row_cache[offset..offset + take]);
            copied += take;
            self.pos += take as u64;
        }
        Ok(copied)
    }

    fn fill_row(&mut self, row: u64) -> Result<(), FormatError> {
        if self.cached_row == Some(row) {
            return Ok(());
        }
        let channels = self.channels as usize;
        let row_len = channels * BLOCK_SIZE as usize;
        let offset = AUDIO_START + row * row_len as u64;
        let mut raw = vec![0u8; row_len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(&mut raw)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => FormatError::UnexpectedEof,
                _ => FormatError::Io(e),
            })?;

        // The 1-bit form stores LSB-first; the byte form is already
        // MSB-first and passes through untouched.
        let reverse = self.bits_per_sample == 1;
        self.row_cache.resize(row_len, 0);
        for q in 0..BLOCK_SIZE as usize {
            for c in 0..channels {
                let byte = raw[c * BLOCK_SIZE as usize + q];
                self.row_cache[q * channels + c] =
                    if reverse { bit_reverse(byte) } else { byte };
            }
        }
        self.cached_row = Some(row);
        Ok(())
    }

    /// Append canonical audio bytes.
    pub fn write_audio(&mut self, buf: &[u8]) -> Result<usize, FormatError> {
        if self.mode != Mode::Write {
            return Err(FormatError::InvalidState("write_audio on a read-mode file"));
        }
        if self.finalized {
            return Err(FormatError::InvalidState("write_audio after finalize"));
        }

        let channels = self.channels as usize;
        let reverse = self.bits_per_sample == 1;
        for (i, &byte) in buf.iter().enumerate() {
            let channel = (self.written_bytes as usize + i) % channels;
            self.staged[channel]
                .push(if reverse { bit_reverse(byte) } else { byte });
        }
        self.written_bytes += buf.len() as u64;

        while self.staged.iter().all(|s| s.len() >= BLOCK_SIZE as usize) {
            self.flush_row(false)?;
        }
        Ok(buf.len())
    }

    fn flush_row(&mut self, pad: bool) -> Result<(), FormatError> {
        for staged in &mut self.staged {
            let mut block: Vec<u8> = staged
                .drain(..staged.len().min(BLOCK_SIZE as usize))
                .collect();
            if pad {
                block.resize(BLOCK_SIZE as usize, 0);
            }
            debug_assert_eq!(block.len(), BLOCK_SIZE as usize);
            self.file.write_all(&block)?;
        }
        self.audio_bytes += self.channels as u64 * BLOCK_SIZE;
        Ok(())
    }

    /// Seek in one-bit-frame units (1/75 s). Returns the new frame index.
    pub fn seek_frames(&mut self, pos: SeekFrom) -> Result<u64, FormatError> {
        if self.mode == Mode::Write {
            return Err(FormatError::InvalidState("seek on a write-mode file"));
        }
        let frame_len = self.frame_bytes()?;
        let total = self.total_frames()?;
        let current = self.pos / frame_len;
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => current as i128 + delta as i128,
            SeekFrom::End(delta) => total as i128 + delta as i128,
        };
        if target < 0 || target > total as i128 {
            return Err(FormatError::InvalidArg("seek target out of range"));
        }
        self.pos = target as u64 * frame_len;
        Ok(target as u64)
    }

    /// The trailing metadata blob, loading it from the file on first use.
    pub fn metadata_blob(&mut self) -> Result<Option<&[u8]>, FormatError> {
        if self.metadata_blob.is_none() && self.tag_offset != 0 {
            let len = self.file.metadata()?.len();
            let size = len.saturating_sub(self.tag_offset);
            self.file.seek(SeekFrom::Start(self.tag_offset))?;
            self.metadata_blob = Some(chunk::read_vec(&mut self.file, size as usize)?);
        }
        Ok(self.metadata_blob.as_deref())
    }

    /// Replace the trailing metadata blob; written out at finalize.
    pub fn set_metadata_blob(&mut self, blob: Vec<u8>) -> Result<(), FormatError> {
        if self.mode == Mode::Read {
            return Err(FormatError::InvalidState(
                "set_metadata_blob on a read-only file",
            ));
        }
        if blob.len() as u64 > MAX_METADATA_SIZE {
            return Err(FormatError::InvalidArg("metadata blob too large"));
        }
        self.metadata_blob = Some(blob);
        self.metadata_dirty = true;
        Ok(())
    }

    /// Back-patch every size field and write pending metadata.
    pub fn finalize(&mut self) -> Result<(), FormatError> {
        match self.mode {
            Mode::Read => {
                return Err(FormatError::InvalidState("finalize on a read-only file"))
            }
            Mode::Write => {
                if self.finalized {
                    return Err(FormatError::InvalidState("finalize called twice"));
                }
                if self.staged.iter().any(|s| !s.is_empty()) {
                    self.flush_row(true)?;
                }
                self.sample_count = self.written_bytes.div_ceil(self.channels as u64) * 8;
            }
            Mode::Modify => {
                if !self.metadata_dirty {
                    self.finalized = true;
                    return Ok(());
                }
                self.file.set_len(AUDIO_START + self.audio_bytes)?;
            }
        }

        let blob_len = if self.metadata_dirty || self.mode == Mode::Write {
            self.metadata_blob.as_ref().map_or(0, |b| b.len() as u64)
        } else {
            0
        };
        self.tag_offset = if blob_len > 0 {
            AUDIO_START + self.audio_bytes
        } else {
            0
        };
        if let (Some(blob), true) = (&self.metadata_blob, blob_len > 0) {
            self.file.seek(SeekFrom::Start(AUDIO_START + self.audio_bytes))?;
            self.file.write_all(blob)?;
        }

        let total = AUDIO_START + self.audio_bytes + blob_len;
        write_fixed_header(
            &mut self.file,
            self.channels,
            self.sample_rate,
            self.bits_per_sample,
            total,
            self.tag_offset,
            self.sample_count,
        )?;
        self.file.seek(SeekFrom::Start(84))?;
        chunk::write_u64_le(&mut self.file, DATA_HEADER_SIZE + self.audio_bytes)?;
        self.file.flush()?;
        self.finalized = true;
        debug!(total, self.sample_count, "finalized DSF container");
        Ok(())
    }

    pub fn close(self) -> Result<(), FormatError> {
        if self.mode == Mode::Write && !self.finalized {
            warn!("DSF file closed without finalize; size fields are stale");
        }
        if self.mode != Mode::Read {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

/// Canonical bytes in one 1/75-second frame across all channels.
pub fn frame_bytes(sample_rate: u32, channels: u32) -> Result<u64, FormatError> {
    if sample_rate % 44_100 != 0 {
        return Err(FormatError::InvalidArg(
            "sample rate is not a 44.1 kHz multiple",
        ));
    }
    let samples = 588 * (sample_rate / 44_100) as u64;
    debug_assert_eq!(samples % 8, 0);
    Ok(samples / 8 * channels as u64)
}

/// DSF channel-type code for a channel count.
fn channel_type(channels: u32) -> u32 {
    match channels {
        1 => 1,
        2 => 2,
        3 => 3,
        4 => 5,
        5 => 6,
        _ => 7,
    }
}

fn write_fixed_header(
    file: &mut File,
    channels: u32,
    sample_rate: u32,
    bits_per_sample: u32,
    total_file_size: u64,
    tag_offset: u64,
    sample_count: u64,
) -> Result<(), FormatError> {
    file.seek(SeekFrom::Start(0))?;
    chunk::write_fourcc(file, HEADER_MAGIC)?;
    chunk::write_u64_le(file, HEADER_CHUNK_SIZE)?;
    chunk::write_u64_le(file, total_file_size)?;
    chunk::write_u64_le(file, tag_offset)?;

    chunk::write_fourcc(file, FORMAT_MAGIC)?;
    chunk::write_u64_le(file, FORMAT_CHUNK_SIZE)?;
    chunk::write_u32_le(file, 1)?;
    chunk::write_u32_le(file, 0)?;
    chunk::write_u32_le(file, channel_type(channels))?;
    chunk::write_u32_le(file, channels)?;
    chunk::write_u32_le(file, sample_rate)?;
    chunk::write_u32_le(file, bits_per_sample)?;
    chunk::write_u64_le(file, sample_count)?;
    chunk::write_u32_le(file, BLOCK_SIZE as u32)?;
    chunk::write_u32_le(file, 0)?;

    chunk::write_fourcc(file, DATA_MAGIC)?;
    chunk::write_u64_le(file, DATA_HEADER_SIZE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        tempfile::tempdir().unwrap().keep().join(name)
    }

    fn canonical_pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 + 11) as u8).collect()
    }

    #[test]
    fn write_then_read_round_trips_canonical_bytes() {
        let path = temp_path("roundtrip.dsf");
        let data = canonical_pattern(2 * 4704 * 10);

        let mut writer = DsfFile::create(&path, 2, 2_822_400, 1).unwrap();
        writer.write_audio(&data).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let mut reader = DsfFile::open(&path).unwrap();
        assert_eq!(reader.channels(), 2);
        assert_eq!(reader.sample_rate(), 2_822_400);
        assert_eq!(reader.sample_count(), data.len() as u64 / 2 * 8);

        let mut back = vec![0u8; data.len()];
        assert_eq!(reader.read_audio(&mut back).unwrap(), data.len());
        assert_eq!(back, data);
    }

    #[test]
    fn chunk_size_identity_holds() {
        let path = temp_path("sizes.dsf");
        let data = canonical_pattern(2 * 4096 + 13);

        let mut writer = DsfFile::create(&path, 2, 2_822_400, 1).unwrap();
        writer.write_audio(&data).unwrap();
        writer.set_metadata_blob(vec![0xAB; 77]).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        // One padded block row per channel plus the 77-byte tag blob.
        let audio = 2 * 2 * 4096;
        assert_eq!(len, 28 + 52 + 12 + audio + 77);
    }

    #[test]
    fn seek_is_in_frame_units() {
        let path = temp_path("seek.dsf");
        let frame = 4704 * 2;
        let data = canonical_pattern(frame * 4);

        let mut writer = DsfFile::create(&path, 2, 2_822_400, 1).unwrap();
        writer.write_audio(&data).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let mut reader = DsfFile::open(&path).unwrap();
        assert_eq!(reader.seek_frames(SeekFrom::Start(2)).unwrap(), 2);
        let mut buf = vec![0u8; frame];
        reader.read_audio(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[frame * 2..frame * 3]);

        assert_eq!(reader.seek_frames(SeekFrom::End(-1)).unwrap(), 3);
        assert_eq!(reader.seek_frames(SeekFrom::Current(-3)).unwrap(), 0);
        assert!(reader.seek_frames(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn inflated_total_size_is_rejected_at_open() {
        let path = temp_path("lying.dsf");
        let mut writer = DsfFile::create(&path, 2, 2_822_400, 1).unwrap();
        writer.write_audio(&canonical_pattern(4096)).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        // Inflate the declared total size tenfold.
        let real = std::fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(12)).unwrap();
        file.write_all(&(real * 10).to_le_bytes()).unwrap();
        drop(file);

        assert!(matches!(
            DsfFile::open(&path),
            Err(FormatError::InvalidFile(_))
        ));
    }

    #[test]
    fn metadata_blob_survives_modify() {
        let path = temp_path("meta.dsf");
        let mut writer = DsfFile::create(&path, 2, 2_822_400, 1).unwrap();
        writer.write_audio(&canonical_pattern(1000)).unwrap();
        writer.finalize().unwrap();
        writer.close().unwrap();

        let mut editor = DsfFile::modify(&path).unwrap();
        editor.set_metadata_blob(b"tag payload".to_vec()).unwrap();
        editor.finalize().unwrap();
        editor.close().unwrap();

        let mut reader = DsfFile::open(&path).unwrap();
        assert_eq!(reader.metadata_blob().unwrap(), Some(&b"tag payload"[..]));
    }
}
