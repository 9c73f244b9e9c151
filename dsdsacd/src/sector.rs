//! Sector sources: a plain disc-image file, or an authenticated drive
//! whose sectors are AES-128-CBC decrypted in place.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::debug;

use crate::auth::{disc_iv, DiscKey, SacSession};
use crate::crypto::aes128_cbc_decrypt_in_place;
use crate::transport::DriveTransport;
use crate::SacdError;

/// Sector size shared by every source.
pub const SECTOR_SIZE: usize = 2048;

/// Anything that yields 2048-byte sectors by logical sector number.
pub trait SectorSource: Send {
    /// Fill `buf` (a whole number of sectors) starting at `lsn`.
    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8]) -> Result<(), SacdError>;

    /// Total sectors available.
    fn sector_count(&self) -> u64;
}

/// A disc image on the filesystem; reads are plain file reads.
pub struct ImageFileSource {
    file: File,
    sectors: u64,
}

impl ImageFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SacdError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len % SECTOR_SIZE as u64 != 0 {
            return Err(SacdError::InvalidFile(
                "image length is not a whole number of sectors",
            ));
        }
        debug!(sectors = len / SECTOR_SIZE as u64, "opened disc image");
        Ok(ImageFileSource {
            file,
            sectors: len / SECTOR_SIZE as u64,
        })
    }
}

impl SectorSource for ImageFileSource {
    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8]) -> Result<(), SacdError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(SacdError::InvalidArg("buffer is not sector-aligned"));
        }
        let wanted = (buf.len() / SECTOR_SIZE) as u64;
        if lsn as u64 + wanted > self.sectors {
            return Err(SacdError::UnexpectedEof);
        }
        self.file
            .seek(SeekFrom::Start(lsn as u64 * SECTOR_SIZE as u64))?;
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SacdError::UnexpectedEof
            } else {
                SacdError::Io(e)
            }
        })?;
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sectors
    }
}

/// A physical or emulated drive. Construction runs BD authentication and
/// the SAC exchange; every sector read is decrypted in place with the
/// recovered per-disc key. The key is zeroised when the source drops.
pub struct AuthenticatedDriveSource<T: DriveTransport> {
    transport: T,
    disc_key: DiscKey,
}

impl<T: DriveTransport> AuthenticatedDriveSource<T> {
    pub fn open(mut transport: T) -> Result<Self, SacdError> {
        let disc_key = SacSession::authenticate(&mut transport)?;
        Ok(AuthenticatedDriveSource {
            transport,
            disc_key,
        })
    }
}

impl<T: DriveTransport> SectorSource for AuthenticatedDriveSource<T> {
    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8]) -> Result<(), SacdError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(SacdError::InvalidArg("buffer is not sector-aligned"));
        }
        self.transport.read_sectors(lsn, buf)?;
        let iv = disc_iv();
        for sector in buf.chunks_mut(SECTOR_SIZE) {
            aes128_cbc_decrypt_in_place(self.disc_key.as_bytes(), &iv, sector)?;
        }
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.transport.sector_count()
    }
}
