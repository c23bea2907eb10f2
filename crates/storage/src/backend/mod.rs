//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface over path-addressed content stores: a local directory, an
//! in-memory map for tests, or an Artifactory-compatible HTTP repository.

#[cfg(feature = "artifactory")]
mod artifactory;
mod local;
#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "artifactory")]
pub use self::artifactory::ArtifactoryBackend;
pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::{BackendHandle, Checksums, Credential, FileInfo, Properties};
use async_trait::async_trait;
use bytes::Bytes;
use depot_archive::Compression;
use futures::{Stream, TryStreamExt};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Blob content: a reader and the exact number of bytes it yields.
pub struct Content {
    pub reader: BoxAsyncRead,
    pub size: u64,
}

impl Content {
    pub fn new(reader: impl AsyncRead + Send + 'static, size: u64) -> Self {
        Self { reader: Box::pin(reader), size }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content").field("size", &self.size).finish_non_exhaustive()
    }
}

impl From<Bytes> for Content {
    fn from(data: Bytes) -> Self {
        let size = data.len() as u64;
        Self::new(Cursor::new(data), size)
    }
}

impl From<Vec<u8>> for Content {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl<const N: usize> From<&'static [u8; N]> for Content {
    fn from(data: &'static [u8; N]) -> Self {
        Bytes::from_static(data).into()
    }
}

/// Best-effort MIME type from a path, for stores that don't record one.
pub(crate) fn guess_mime_type(path: &Path) -> &'static str {
    match (Compression::from_path(path), path.extension().and_then(|ext| ext.to_str())) {
        (Compression::Gzip, _) => "application/x-gzip",
        (_, Some("json")) => "application/json",
        _ => "application/octet-stream",
    }
}

/// Unified interface for content stores.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. Blobs are addressed by a relative path
/// and may carry a property bag (string keys, lists of string values) that
/// the store keeps alongside the content.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations should
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use depot_storage::{StorageBackend, error::Result};
///
/// async fn collection_namespace(backend: &dyn StorageBackend) -> Result<Option<String>> {
///     let path = Path::new("community-general-1.0.0.tar.gz");
///     if !backend.exists(path).await? {
///         return Ok(None);
///     }
///     let properties = backend.properties(path).await?;
///     Ok(properties.first("namespace").map(str::to_string))
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// Returns metadata for all files in the storage backend as a
    /// [`Stream`], yielding results incrementally. If a prefix is provided,
    /// only files whose paths start with the prefix (component-wise) are
    /// returned. Listing a prefix that doesn't exist yields nothing rather
    /// than an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use depot_storage::{StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(None);
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Read the property bag attached to a file.
    ///
    /// A file without properties yields an empty bag, not an error.
    async fn properties(&self, path: &Path) -> Result<Properties>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Open a file for streaming reads.
    ///
    /// The file (or connection) is opened before returning; content is only
    /// pulled as the reader is polled.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use tokio::io::AsyncReadExt;
    /// # use depot_storage::{StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut reader = backend.reader(Path::new("community-general-1.0.0.tar.gz")).await?;
    /// let mut magic = [0u8; 2];
    /// reader.read_exact(&mut magic).await.unwrap();
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead>;

    /// Write file contents, creating or replacing the file.
    ///
    /// Used for documents the store doesn't need to verify (cache entries).
    /// Implementations should create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Deploy an artifact along with its digests and, optionally, its
    /// property bag in the same call. The content is streamed to the store.
    ///
    /// Returns [`PropertiesRejected`](crate::error::ErrorKind::PropertiesRejected)
    /// if the store cannot accept the properties inline; the blob is then
    /// not written and the caller should deploy fresh content without
    /// properties and follow up with [`set_properties()`](Self::set_properties).
    async fn deploy(
        &self,
        path: &Path,
        content: Content,
        checksums: &Checksums,
        properties: Option<&Properties>,
    ) -> Result<()>;

    /// Replace the property bag of an existing file.
    async fn set_properties(&self, path: &Path, properties: &Properties) -> Result<()>;

    /// A handle to the same store that authenticates as `credential`.
    ///
    /// Stores without a notion of identity return an equivalent handle and
    /// ignore the credential.
    fn authorize(&self, credential: Option<&Credential>) -> BackendHandle;
}
