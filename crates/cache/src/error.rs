//! Cache Error Types
//!
//! A broken cache entry is never fatal to a request: loading treats it as
//! empty and persisting only logs. These kinds exist so the underlying cause
//! can be reported in those logs.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The persisted entry couldn't be decoded.
    #[display("invalid cache entry")]
    InvalidEntry,
    /// A timestamp couldn't be formatted or parsed.
    #[display("invalid timestamp: {_0}")]
    InvalidTimestamp(#[error(not(source))] String),
    /// The content store failed to read or write the entry.
    #[display("cache storage error")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }
}
