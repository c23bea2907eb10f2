//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. The HTTP layer maps each kind onto a
//! status code.

use depot_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use depot_upstream::error::{Error as UpstreamError, ErrorKind as UpstreamErrorKind};
use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lookup by namespace and name matched more than one collection.
    #[display("ambiguous collection identity: {_0}")]
    AmbiguousIdentity(#[error(not(source))] String),
    /// Neither the store nor upstream know the requested item.
    #[display("not found")]
    NotFound,
    /// The upload doesn't hash to the checksum it was declared with.
    #[display("hash mismatch: uploaded=='{declared}', calculated=='{calculated}'")]
    ChecksumMismatch {
        #[error(not(source))]
        declared: String,
        #[error(not(source))]
        calculated: String,
    },
    /// The upload couldn't be read or decoded, or names an invalid target.
    #[display("invalid upload: {_0}")]
    InvalidUpload(#[error(not(source))] String),
    /// A download points at a host that artifacts may not be fetched from.
    #[display("download source not allowed: {_0}")]
    UntrustedSource(#[error(not(source))] String),
    #[display("manifest not found in collection archive")]
    ManifestNotFound,
    #[display("error loading manifest from collection archive")]
    ManifestParse,
    /// The content store failed. `status` and `body` are relayed from HTTP
    /// stores.
    #[display("storage error")]
    Storage {
        #[error(not(source))]
        status: Option<u16>,
        #[error(not(source))]
        body: String,
    },
    /// Upstream failed. `status` and `body` are relayed when upstream
    /// answered at all.
    #[display("upstream error")]
    Upstream {
        #[error(not(source))]
        status: Option<u16>,
        #[error(not(source))]
        body: String,
    },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage { status, .. } | Self::Upstream { status, .. } => status.is_none_or(|s| s >= 500),
            _ => false,
        }
    }

    /// Wrap a store failure, keeping what an HTTP store answered.
    #[track_caller]
    pub fn storage(err: StorageError) -> Error {
        let kind = match &*err {
            StorageErrorKind::Http { status, body } => Self::Storage { status: Some(*status), body: body.clone() },
            _ => Self::Storage { status: None, body: String::new() },
        };
        err.raise(kind)
    }

    /// Wrap an upstream failure, keeping what upstream answered.
    #[track_caller]
    pub fn upstream(err: UpstreamError) -> Error {
        let kind = match &*err {
            UpstreamErrorKind::Status { status, body } => Self::Upstream { status: Some(*status), body: body.clone() },
            _ => Self::Upstream { status: None, body: String::new() },
        };
        err.raise(kind)
    }
}
