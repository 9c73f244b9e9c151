//! # dsdfmt
//!
//! Container codecs for one-bit audio: the little-endian per-track format
//! (DSF), the big-endian hierarchical format (DSDIFF) including its coded
//! frame stream and index, and the shared chunk primitives.
//!
//! Both codecs expose the same contract (create/open/modify, audio
//! read/write, frame-unit seeking, metadata access, finalize-time size
//! back-patching) and both speak the workspace-canonical audio layout at
//! their API: channel-interleaved bytes, MSB-first. DSF converts to its
//! LSB-first block-interleaved storage internally, so moving audio between
//! the two containers needs no caller-side bit juggling.

pub mod chunk;
pub mod dsdiff;
pub mod dsf;
pub mod error;
pub mod id3;

pub use chunk::{bit_reverse, bit_reverse_buf, FourCc};
pub use dsdiff::{Compression, Comment, DsdiffFile, DsdiffMetadata, DstFrame, FRAME_RATE};
pub use dsf::{frame_bytes, DsfFile, BLOCK_SIZE};
pub use error::FormatError;
