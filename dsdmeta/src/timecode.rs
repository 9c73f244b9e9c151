use std::fmt;

use serde::{Deserialize, Serialize};

use crate::FRAMES_PER_SECOND;

/// A 75 fps time code, displayed as `MM:SS:FF`.
///
/// Minutes are unbounded; seconds and frames stay below their radix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeCode {
    pub minutes: u32,
    pub seconds: u8,
    pub frames: u8,
}

impl TimeCode {
    pub fn new(minutes: u32, seconds: u8, frames: u8) -> Self {
        debug_assert!(seconds < 60 && (frames as u32) < FRAMES_PER_SECOND);
        TimeCode {
            minutes,
            seconds,
            frames,
        }
    }

    /// Normalise a one-bit frame index into minutes/seconds/frames.
    pub fn from_frames(frames: u64) -> Self {
        let fps = FRAMES_PER_SECOND as u64;
        TimeCode {
            minutes: (frames / (fps * 60)) as u32,
            seconds: ((frames / fps) % 60) as u8,
            frames: (frames % fps) as u8,
        }
    }

    /// The one-bit frame index this time code addresses.
    pub fn to_frames(self) -> u64 {
        (self.minutes as u64 * 60 + self.seconds as u64) * FRAMES_PER_SECOND as u64
            + self.frames as u64
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.minutes, self.seconds, self.frames
        )
    }
}
