//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, the same shape as every other crate in the workspace.

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Data is corrupt or malformed. Don't retry with the same input.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// The requested format is not supported.
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The archive was readable but contains no manifest document.
    #[display("manifest not found in archive")]
    ManifestNotFound,
    /// The archive or its manifest could not be parsed.
    #[display("unable to parse manifest: {_0}")]
    ManifestParse(#[error(not(source))] String),
    /// An I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}
