//! Store paths.
//!
//! Every path handed to a backend is relative to the store root. Paths are
//! normalized before use: `.` and empty segments disappear, `..` pops a
//! segment, and anything that would climb out of the root is rejected.

use crate::error::{ErrorKind, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Top-level directory reserved for cached upstream responses.
pub const CACHE_PREFIX: &str = "_cache";

/// Normalize a store path, rejecting traversal out of the root, null bytes,
/// platform prefixes and paths that normalize to nothing.
///
/// ```
/// use std::path::Path;
/// use depot_storage::validate_path;
///
/// assert!(validate_path("community-general-1.0.0.tar.gz").is_ok());
/// assert!(validate_path("a/../file.tar.gz").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("/_cache/api/v3/../v2//./collections/").unwrap(),
///     Path::new("_cache/api/v2/collections")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(path.to_path_buf());
    let mut segments: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::RootDir => {},
            // Null bytes survive Path::components() on Unix and truncate the
            // path at the syscall boundary.
            Component::Normal(segment) if segment.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(segment) => segments.push(segment),
            Component::ParentDir => {
                if segments.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
            Component::Prefix(_) => exn::bail!(invalid()),
        }
    }
    if segments.is_empty() {
        exn::bail!(invalid());
    }
    Ok(segments.into_iter().collect())
}

/// Whether a (normalized) path lives under [`CACHE_PREFIX`], where only the
/// federation cache may write.
pub fn is_reserved(path: &Path) -> bool {
    path.components().next() == Some(Component::Normal(OsStr::new(CACHE_PREFIX)))
}
