//! Frames: the unit of data flow between nodes.

use std::sync::Arc;

use crate::format::AudioFormat;

/// One ordered payload moving through the graph.
///
/// Payloads are shared immutably, so fanning a frame out to several sinks
/// never copies audio bytes. Sequence numbers are contiguous within one
/// track and restart at zero on every track.
#[derive(Debug, Clone)]
pub struct Frame {
    pub format: AudioFormat,
    pub seq: u64,
    pub payload: Arc<[u8]>,
    /// CRC block attached to a coded frame, carried verbatim through
    /// compressed passthrough.
    pub crc: Option<Arc<[u8]>>,
}

impl Frame {
    pub fn new(format: AudioFormat, seq: u64, payload: Vec<u8>) -> Self {
        Frame {
            format,
            seq,
            payload: Arc::from(payload),
            crc: None,
        }
    }

    pub fn with_crc(format: AudioFormat, seq: u64, payload: Vec<u8>, crc: Option<Vec<u8>>) -> Self {
        Frame {
            format,
            seq,
            payload: Arc::from(payload),
            crc: crc.map(Arc::from),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
