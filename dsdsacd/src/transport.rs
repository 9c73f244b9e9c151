//! Transport abstraction over the drive's vendor-specific command set.
//!
//! The real transport is a SCSI-like pass-through with per-command
//! timeouts (120 s by default) owned by the layer below this trait; the
//! tests script a drive in memory.

use crate::SacdError;

/// The six ordered commands of the SAC key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SacCommand {
    /// Returns the drive's 8-byte format descriptor.
    Cmd0,
    /// Carries the host random, certificate id, and public-key blob.
    Cmd2,
    /// Returns the drive certificate.
    Cmd3,
    /// Carries the host signature and encrypted session random.
    Cmd4,
    /// Returns the drive's nested session blob.
    Cmd5,
    /// Returns the encrypted per-disc key block.
    Cmd6,
}

/// Status and payload of one command round-trip.
#[derive(Debug, Clone)]
pub struct SacResponse {
    /// Zero on success; any other value aborts the exchange.
    pub status: i32,
    pub data: Vec<u8>,
}

/// One drive (or drive emulation) the read path can talk to.
pub trait DriveTransport: Send {
    /// Check drive and disc presence.
    fn check_ready(&mut self) -> Result<(), SacdError>;

    /// Issue one BD-authentication command carrying an embedded key.
    /// Returns the command status.
    fn establish_key(&mut self, slot: u8, key: &[u8; 16]) -> Result<i32, SacdError>;

    /// Issue one SAC exchange command.
    fn sac_command(&mut self, command: SacCommand, payload: &[u8])
        -> Result<SacResponse, SacdError>;

    /// Read raw sectors starting at `lsn`; `buf` is a whole number of
    /// 2048-byte sectors.
    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8]) -> Result<(), SacdError>;

    /// Total sectors on the mounted disc.
    fn sector_count(&self) -> u64;
}
