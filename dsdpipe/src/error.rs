use dsddst::DstError;
use dsdfmt::FormatError;
use dsdmeta::MetadataError;
use dsdsacd::SacdError;

/// Errors surfaced by the pipeline runtime.
///
/// The coordinator records the first error of a run, repairs sink
/// lifecycles (`track_end` on every sink that saw `track_start`), still
/// attempts `finalize` and `close`, and returns it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("operation not legal in the current state: {0}")]
    InvalidState(&'static str),
    #[error("requested feature is not compiled in: {0}")]
    FeatureUnavailable(&'static str),
    #[error("run cancelled")]
    Cancelled,
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Dst(#[from] DstError),
    #[error(transparent)]
    Sacd(#[from] SacdError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn invalid_arg(message: impl Into<String>) -> Self {
        PipelineError::InvalidArg(message.into())
    }
}
