//! Upstream registry client.
//!
//! The gateway federates reads with a second registry speaking the same
//! protocol. Requests are moved from the gateway's root onto the upstream
//! root (credentials and connection headers stripped), and responses are
//! moved back so that every link in them points at the gateway.

mod client;
pub mod error;
mod request;
mod retry;
mod rewrite;

pub use crate::client::{ByteStream, UpstreamClient, UpstreamDownload};
pub use crate::request::InboundRequest;
pub use crate::retry::RetryPolicy;
pub use crate::rewrite::{DOWNLOAD_HINT, rewrite_response};
