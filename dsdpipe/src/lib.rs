//! # dsdpipe
//!
//! Batch processing runtime for one-bit audio. A source node feeds an
//! optional transform chain (decompressor, one-bit to PCM export) whose
//! output fans out to any number of sinks: container writers, PCM
//! encoders, and metadata reports. The coordinator sequences tracks,
//! reports progress, and honours cooperative cancellation.
//!
//! The coordinator drives every node sequentially on one task; the only
//! cross-thread state is the cancellation token handed to [`Pipeline::run`].
//!
//! ```no_run
//! use dsdpipe::nodes::dsf_source::DsfFileSource;
//! use dsdpipe::nodes::wav_sink::{WavSinkConfig, WavTrackSink};
//! use dsdpipe::{Pipeline, PipelineOptions};
//!
//! # async fn example() -> Result<(), dsdpipe::PipelineError> {
//! let mut pipeline = Pipeline::new(PipelineOptions::default());
//! pipeline.set_source(Box::new(DsfFileSource::open("input.dsf")?))?;
//! pipeline.add_sink(Box::new(WavTrackSink::new(WavSinkConfig {
//!     base_dir: "out".into(),
//!     bit_depth: Default::default(),
//!     track_policy: Default::default(),
//!     album_policy: Default::default(),
//!     write_metadata: true,
//! })))?;
//!
//! let handle = pipeline.start();
//! let (_pipeline, result) = handle.wait().await;
//! result?;
//! # Ok(())
//! # }
//! ```

mod detect;
pub mod dsp;
mod error;
mod format;
mod frame;
mod naming;
pub mod nodes;
mod options;
mod pipeline;
mod progress;

pub use detect::{detect_format, open_file_source, DetectedFormat};
pub use error::PipelineError;
pub use format::{AudioFormat, AudioKind, ChannelLayout};
pub use frame::Frame;
pub use naming::{album_dir_name, sanitise_component, track_file_stem, unique_path};
pub use options::{
    AlbumDirPolicy, ChannelArea, PcmBitDepth, PcmQuality, PipelineOptions, TrackFilenamePolicy,
};
pub use pipeline::{Pipeline, PipelineHandle, RunSummary};
pub use progress::{ProgressAction, ProgressCallback, ProgressSnapshot};
