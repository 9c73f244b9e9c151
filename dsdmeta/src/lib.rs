//! Album and track metadata shared between the DSDKit crates.
//!
//! Metadata is owned data: sources build it once at open time, the pipeline
//! hands copies to sinks on each track start, and sinks keep nothing past
//! track end. Time-based fields use one-bit *frames*, the 1/75-second unit
//! every container in this workspace counts in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod selection;
mod timecode;

pub use selection::TrackSelection;
pub use timecode::TimeCode;

/// One-bit frames per second, shared by every time field in this crate.
pub const FRAMES_PER_SECOND: u32 = 75;

/// Errors raised while building or validating metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("invalid ISRC {0:?}: must be 12 ASCII alphanumeric characters")]
    InvalidIsrc(String),
    #[error("invalid track selection {input:?}: {reason}")]
    InvalidSelection { input: String, reason: String },
}

/// Album-scope metadata.
///
/// Every field is optional; sinks render what is present and leave the rest
/// out (or null, for the structured dump).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub publisher: Option<String>,
    pub copyright: Option<String>,
    pub catalog_number: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub disc_number: Option<u32>,
    pub disc_total: Option<u32>,
}

/// Track-scope metadata.
///
/// `start_frames` and `duration_frames` position the track inside its
/// source in one-bit frames (75 per second).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub performer: Option<String>,
    pub composer: Option<String>,
    pub arranger: Option<String>,
    pub songwriter: Option<String>,
    pub isrc: Option<Isrc>,
    pub start_frames: u64,
    pub duration_frames: u64,
    pub number: u32,
    pub total: u32,
    /// Free-form tags that have no dedicated field.
    pub extra: BTreeMap<String, String>,
}

impl TrackInfo {
    /// Track start expressed as a 75 fps time code.
    pub fn start_time(&self) -> TimeCode {
        TimeCode::from_frames(self.start_frames)
    }

    /// Track duration expressed as a 75 fps time code.
    pub fn duration_time(&self) -> TimeCode {
        TimeCode::from_frames(self.duration_frames)
    }

    /// Duration in whole seconds, rounded down.
    pub fn duration_seconds(&self) -> u64 {
        self.duration_frames / FRAMES_PER_SECOND as u64
    }
}

/// International Standard Recording Code: exactly 12 ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Isrc(String);

impl Isrc {
    pub const LEN: usize = 12;

    pub fn new(code: &str) -> Result<Self, MetadataError> {
        if code.len() != Self::LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(MetadataError::InvalidIsrc(code.to_string()));
        }
        Ok(Isrc(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Isrc {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Isrc::new(s)
    }
}

impl TryFrom<String> for Isrc {
    type Error = MetadataError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Isrc::new(&s)
    }
}

impl From<Isrc> for String {
    fn from(isrc: Isrc) -> String {
        isrc.0
    }
}

impl fmt::Display for Isrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a marker inside an edit-master container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerKind {
    TrackStart,
    TrackStop,
    Index,
}

/// A named position in an edit-master run.
///
/// Offsets are in samples per channel, the native unit of the big-endian
/// container's marker chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub offset_samples: u64,
    pub kind: MarkerKind,
    pub text: Option<String>,
}

impl Marker {
    pub fn track_start(offset_samples: u64, text: Option<String>) -> Self {
        Marker {
            offset_samples,
            kind: MarkerKind::TrackStart,
            text,
        }
    }
}
