//! Server Error Types
//!
//! [`ErrorKind`] covers startup failures. Request failures are library errors
//! wrapped in [`ApiError`], which turns them into responses: a status code
//! with an empty body, a short message, or the body relayed from the store or
//! upstream. Internal details are only ever logged.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use depot_library::error::{Error as LibraryError, ErrorKind as LibraryErrorKind};
use derive_more::{Display, Error};

/// A server error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for server startup.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("unable to open content store")]
    Storage,
    #[display("unable to configure upstream registry")]
    Upstream,
    #[display("unable to set up logging")]
    Logging,
    #[display("server error")]
    Serve,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Serve)
    }
}

const MANIFEST_ERROR: &str = "Error loading manifest from collection archive.";

/// A failed request.
#[derive(Debug)]
pub enum ApiError {
    Library(LibraryError),
    /// The request itself is malformed.
    BadRequest(String),
    /// A publish form couldn't be read: malformed, or over the body limit.
    Multipart(MultipartError),
    /// An upload couldn't be spooled to local storage.
    Spool(std::io::Error),
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        Self::Library(err)
    }
}

fn relay(status: Option<u16>, body: &str, fallback: StatusCode) -> Response {
    let status = status.and_then(|s| StatusCode::from_u16(s).ok()).unwrap_or(fallback);
    (status, body.to_string()).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::BadRequest(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Multipart(e) => {
                tracing::debug!(error = %e, "Unreadable publish form");
                return (e.status(), e.body_text()).into_response();
            },
            Self::Spool(e) => {
                tracing::error!(error = %e, "Unable to spool upload");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            },
            Self::Library(err) => err,
        };
        match &*err {
            LibraryErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
            LibraryErrorKind::InvalidUpload(message) => (StatusCode::BAD_REQUEST, message.clone()).into_response(),
            LibraryErrorKind::ChecksumMismatch { declared, calculated } => {
                tracing::warn!(declared, calculated, "Rejected upload");
                let message = format!("Hash mismatch: uploaded=='{declared}', calculated=='{calculated}'");
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            },
            LibraryErrorKind::ManifestNotFound | LibraryErrorKind::ManifestParse => {
                tracing::warn!(error = ?err, "Rejected collection archive");
                (StatusCode::INTERNAL_SERVER_ERROR, MANIFEST_ERROR).into_response()
            },
            LibraryErrorKind::Storage { status, body } => {
                tracing::error!(error = ?err, "Content store request failed");
                relay(*status, body, StatusCode::INTERNAL_SERVER_ERROR)
            },
            LibraryErrorKind::Upstream { status, body } => {
                tracing::error!(error = ?err, "Upstream request failed");
                relay(*status, body, StatusCode::BAD_GATEWAY)
            },
            LibraryErrorKind::UntrustedSource(_) => {
                tracing::warn!(error = ?err, "Refused download source");
                StatusCode::FORBIDDEN.into_response()
            },
            LibraryErrorKind::AmbiguousIdentity(_) => {
                tracing::error!(error = ?err, "Ambiguous collection lookup");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(LibraryErrorKind::NotFound, StatusCode::NOT_FOUND)]
    #[case(LibraryErrorKind::ManifestParse, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(LibraryErrorKind::UntrustedSource("internal.example".into()), StatusCode::FORBIDDEN)]
    #[case(LibraryErrorKind::AmbiguousIdentity("a.b".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(LibraryErrorKind::Storage { status: Some(403), body: "denied".into() }, StatusCode::FORBIDDEN)]
    #[case(LibraryErrorKind::Upstream { status: Some(503), body: String::new() }, StatusCode::SERVICE_UNAVAILABLE)]
    #[case(LibraryErrorKind::Upstream { status: None, body: String::new() }, StatusCode::BAD_GATEWAY)]
    fn test_status_mapping(#[case] kind: LibraryErrorKind, #[case] expected: StatusCode) {
        let response = ApiError::from(exn::Exn::from(kind)).into_response();
        assert_eq!(response.status(), expected);
    }
}
