//! Upstream Error Types

use derive_more::{Display, Error};

/// An upstream error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for upstream operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upstream answered with a non-success status. The body is kept so it
    /// can be relayed to the client.
    #[display("upstream returned HTTP {status}")]
    Status {
        #[error(not(source))]
        status: u16,
        #[error(not(source))]
        body: String,
    },
    /// The request never completed (connection, timeout, body read).
    #[display("upstream transport error")]
    Transport,
    /// Upstream answered successfully, but not with JSON.
    #[display("upstream returned an invalid body")]
    InvalidBody,
    #[display("invalid upstream URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// A download hint points at a host downloads may not be fetched from.
    #[display("download host not allowed: {_0}")]
    UntrustedHost(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidBody | Self::InvalidUrl(_) | Self::UntrustedHost(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Transport, true)]
    #[case(ErrorKind::Status { status: 502, body: String::new() }, true)]
    #[case(ErrorKind::Status { status: 404, body: String::new() }, false)]
    #[case(ErrorKind::InvalidBody, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
