//! Collection archive handling.
//!
//! Collections are published as gzipped tarballs that embed a `MANIFEST.json`
//! document. This crate provides:
//!
//! - **Format detection** from file extensions ([`Compression::from_path`]) or
//!   magic bytes ([`Compression::from_magic_bytes`])
//! - **Transport decoding** of uploads that may arrive base64-encoded
//!   ([`UploadFormat`])
//! - **Peek-decide-stream** via [`PeekableReader`], used to sniff the
//!   transport format without consuming the upload
//! - **Manifest extraction** from a collection tarball ([`read_manifest`])
//!
//! Everything here is synchronous [`std::io`]; async callers are expected to
//! run it inside `spawn_blocking`.

mod construct;
mod encoding;
pub mod error;
mod manifest;
mod peekable;

pub use crate::encoding::UploadFormat;
pub use crate::manifest::{CollectionInfo, MANIFEST_FILENAME, Manifest, read_manifest};
pub use crate::peekable::PeekableReader;

/// A supported compression format.
///
/// Collection archives are always gzip; [`None`](Self::None) covers plain
/// files and cache documents. Defaults to [`None`](Self::None).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Gzip compression (.gz, .tgz)
    Gzip,
}
