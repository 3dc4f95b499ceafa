//! Error types for the ZIP codec.

use thiserror::Error;

/// Errors that can occur when working with ZIP archives.
#[derive(Debug, Error)]
pub enum ZipError {
    /// Invalid argument or handle state.
    #[error("invalid parameter: {0}")]
    Param(&'static str),

    /// The archive violates the PKZIP format.
    #[error("malformed archive: {0}")]
    Format(&'static str),

    /// Invalid magic bytes at an expected record boundary.
    #[error("invalid signature: expected {expected:#010x}, got {actual:#010x}")]
    Signature { expected: u32, actual: u32 },

    /// Compression or encryption method not compiled in, or an
    /// attribute conversion between unrelated host systems.
    #[error("unsupported: {0}")]
    Support(&'static str),

    /// Underlying I/O failure, surfaced verbatim.
    #[error("I/O error: {0}")]
    Stream(#[from] std::io::Error),

    /// End-of-read CRC mismatch on a fully consumed payload.
    #[error("crc mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Crc { expected: u32, actual: u32 },

    /// An optional field queried via a getter is absent.
    #[error("{0} not present")]
    Exist(&'static str),

    /// The stream ended where more data was required.
    #[error("unexpected end of stream")]
    EndOfStream,

    /// Iteration moved past the last central-directory entry.
    ///
    /// A terminator, not a failure: callers loop `while` an operation
    /// returns `Ok` and stop on this.
    #[error("end of entry list")]
    EndOfList,

    /// A bookkeeping invariant failed inside the codec.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl From<kovcheg_common::Error> for ZipError {
    fn from(err: kovcheg_common::Error) -> Self {
        match err {
            kovcheg_common::Error::UnexpectedEof { .. } => ZipError::EndOfStream,
            kovcheg_common::Error::InvalidMagic { .. } => ZipError::Format("invalid magic"),
            kovcheg_common::Error::Io(io) => ZipError::Stream(io),
        }
    }
}

/// Result type for ZIP operations.
pub type Result<T> = std::result::Result<T, ZipError>;
