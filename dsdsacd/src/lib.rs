//! # dsdsacd
//!
//! Read side for SACD disc images: 2048-byte sector sources (plain image
//! files or an authenticated optical drive behind a transport trait), the
//! album/area table-of-contents structures, and the six-step SAC key
//! exchange with its surrounding BD authentication.
//!
//! Key material lives only inside this crate's session types and is
//! zeroised when a session ends.

use std::io;

mod auth;
mod crypto;
mod keys;
mod sector;
mod toc;
mod transport;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use auth::{DiscKey, SacSession};
pub use sector::{AuthenticatedDriveSource, ImageFileSource, SectorSource, SECTOR_SIZE};
pub use toc::{Area, AreaToc, MasterToc, SacdReader, MASTER_TOC_LSN};
pub use transport::{DriveTransport, SacCommand, SacResponse};

/// Errors raised by the disc-image read path.
#[derive(Debug, thiserror::Error)]
pub enum SacdError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("drive authentication failed: {0}")]
    AuthFailed(&'static str),
    #[error("SAC key exchange failed: {0}")]
    SacFailed(&'static str),
    #[error("cryptographic operation failed: {0}")]
    CryptoFailed(&'static str),
    #[error("drive not ready")]
    DriveNotReady,
    #[error("no disc in drive")]
    NoDisc,
    #[error("invalid disc image: {0}")]
    InvalidFile(&'static str),
    #[error("unexpected end of disc image")]
    UnexpectedEof,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
