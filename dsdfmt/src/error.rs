use std::io;

/// Errors raised by the container codecs.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("operation not legal in the current state: {0}")]
    InvalidState(&'static str),
    #[error("invalid file: {0}")]
    InvalidFile(&'static str),
    #[error("invalid chunk {id}: {reason}")]
    InvalidChunk { id: String, reason: &'static str },
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    pub(crate) fn chunk(id: impl Into<String>, reason: &'static str) -> Self {
        FormatError::InvalidChunk {
            id: id.into(),
            reason,
        }
    }
}
