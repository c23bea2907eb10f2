//! Catalog Error Types

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A version string is not a valid semantic version.
    #[display("invalid version: {_0}")]
    InvalidVersion(#[error(not(source))] String),
    /// A record was offered to a group of a different collection.
    #[display("record for {found} does not belong to {expected}")]
    IdentityMismatch {
        #[error(not(source))]
        expected: String,
        #[error(not(source))]
        found: String,
    },
    /// A property bag lacks a property required to identify a collection.
    #[display("missing property: {_0}")]
    MissingProperty(#[error(not(source))] String),
    /// A property is present but can't be decoded.
    #[display("invalid property: {_0}")]
    InvalidProperty(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
