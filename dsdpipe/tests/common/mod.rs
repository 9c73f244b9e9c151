//! Shared fixtures: synthetic container files, a disc-image drive
//! emulation, and an instrumented sink that records its lifecycle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dsdfmt::{Compression, DsdiffFile, DsfFile};
use dsdmeta::{AlbumInfo, Marker, TrackInfo};
use dsdpipe::nodes::{FrameSink, SinkCapability};
use dsdpipe::{AudioFormat, Frame, PipelineError};

/// Canonical frame size for stereo 64 FS fixtures.
pub const FRAME_BYTES: usize = 9_408;

pub fn pattern(len: usize, seed: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 131 + seed * 17 + 7) % 256) as u8).collect()
}

/// Write a stereo DSF file holding `frames` whole one-bit frames.
pub fn make_dsf(path: &Path, frames: usize) -> Vec<u8> {
    let data = pattern(frames * FRAME_BYTES, 1);
    let mut file = DsfFile::create(path, 2, 2_822_400, 1).unwrap();
    file.write_audio(&data).unwrap();
    file.finalize().unwrap();
    file.close().unwrap();
    data
}

/// A coded frame that decodes as an uncompressed passthrough body.
pub fn passthrough_frame(seed: usize) -> Vec<u8> {
    let mut frame = vec![0u8];
    frame.extend_from_slice(&pattern(FRAME_BYTES, seed));
    frame
}

/// Write a compressed DSDIFF file of `track_frames.len()` tracks, each a
/// run of passthrough-coded frames, with track-start markers.
pub fn make_dst_dff(path: &Path, track_frames: &[usize]) -> Vec<Vec<u8>> {
    let mut file = DsdiffFile::create(path, 2, 2_822_400, Compression::Dst).unwrap();
    let mut frames = Vec::new();
    let mut frame_index = 0u64;
    for (track, &count) in track_frames.iter().enumerate() {
        file.metadata_mut().unwrap().markers.push(Marker::track_start(
            frame_index * 37_632,
            Some(format!("Track {}", track + 1)),
        ));
        for _ in 0..count {
            let frame = passthrough_frame(frame_index as usize);
            let crc = [(frame_index & 0xFF) as u8, 0xEE, 0xDD, 0xCC];
            file.write_dst_frame(&frame, Some(&crc)).unwrap();
            frames.push(frame);
            frame_index += 1;
        }
    }
    file.finalize().unwrap();
    file.close().unwrap();
    frames
}

/// Find every file with an extension under a directory tree.
pub fn find_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// Parse a WAV file's sample rate and data-chunk length.
pub fn wav_data_len(path: &Path) -> (u32, u32) {
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"WAVE");
    let sample_rate = u32::from_le_bytes(bytes[24..28].try_into().unwrap());
    let data_len = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
    (sample_rate, data_len)
}

/// Lifecycle events an instrumented sink records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    TrackStart(u32),
    Frame(u32, u64),
    TrackEnd(u32),
    Finalize,
    Close,
}

#[derive(Clone, Default)]
pub struct EventLog(pub Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// Assert the sink-contract shape: one open, balanced
    /// track_start/track_end pairs, one finalize, one close, in order,
    /// with contiguous frame sequence numbers per track.
    pub fn assert_contract(&self) {
        let events = self.events();
        assert_eq!(events.first(), Some(&Event::Open), "first event must be open");
        assert_eq!(events.last(), Some(&Event::Close), "last event must be close");
        assert_eq!(
            events[events.len() - 2],
            Event::Finalize,
            "finalize precedes close"
        );
        assert_eq!(
            events.iter().filter(|e| **e == Event::Open).count(),
            1,
            "exactly one open"
        );
        assert_eq!(
            events.iter().filter(|e| **e == Event::Finalize).count(),
            1,
            "exactly one finalize"
        );

        let mut current: Option<u32> = None;
        let mut expected_seq = 0u64;
        for event in &events[1..events.len() - 2] {
            match event {
                Event::TrackStart(n) => {
                    assert!(current.is_none(), "nested track_start");
                    current = Some(*n);
                    expected_seq = 0;
                }
                Event::Frame(n, seq) => {
                    assert_eq!(current, Some(*n), "frame outside its track");
                    assert_eq!(*seq, expected_seq, "sequence numbers must be contiguous");
                    expected_seq += 1;
                }
                Event::TrackEnd(n) => {
                    assert_eq!(current, Some(*n), "unbalanced track_end");
                    current = None;
                }
                other => panic!("unexpected event inside the track region: {other:?}"),
            }
        }
        assert!(current.is_none(), "track left open");
    }

    pub fn tracks_started(&self) -> Vec<u32> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::TrackStart(n) => Some(*n),
                _ => None,
            })
            .collect()
    }
}

/// Instrumented sink recording every lifecycle call.
pub struct RecordingSink {
    capability: SinkCapability,
    log: EventLog,
    current_track: Option<u32>,
}

impl RecordingSink {
    pub fn new(capability: SinkCapability) -> (Self, EventLog) {
        let log = EventLog::default();
        (
            RecordingSink {
                capability,
                log: log.clone(),
                current_track: None,
            },
            log,
        )
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    fn capabilities(&self) -> SinkCapability {
        self.capability
    }

    async fn open(
        &mut self,
        _format: &AudioFormat,
        _album: &AlbumInfo,
    ) -> Result<(), PipelineError> {
        self.log.0.lock().unwrap().push(Event::Open);
        Ok(())
    }

    async fn track_start(
        &mut self,
        number: u32,
        _track: &TrackInfo,
    ) -> Result<(), PipelineError> {
        self.current_track = Some(number);
        self.log.0.lock().unwrap().push(Event::TrackStart(number));
        Ok(())
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<u64, PipelineError> {
        let track = self.current_track.expect("frame outside a track");
        self.log
            .0
            .lock()
            .unwrap()
            .push(Event::Frame(track, frame.seq));
        Ok(frame.payload.len() as u64)
    }

    async fn track_end(&mut self, number: u32) -> Result<(), PipelineError> {
        self.current_track = None;
        self.log.0.lock().unwrap().push(Event::TrackEnd(number));
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), PipelineError> {
        self.log.0.lock().unwrap().push(Event::Finalize);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PipelineError> {
        self.log.0.lock().unwrap().push(Event::Close);
        Ok(())
    }
}
