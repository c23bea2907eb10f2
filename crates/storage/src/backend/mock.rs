//! In-memory storage backend for testing.

use super::{BoxAsyncRead, Content, FileInfoStream, guess_mime_type};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::{BackendHandle, Checksums, Credential, FileInfo, Properties, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

#[derive(Clone)]
struct MockFile {
    inserted: OffsetDateTime,
    data: Vec<u8>,
    checksums: Option<Checksums>,
    properties: Properties,
}
impl MockFile {
    fn new(data: Vec<u8>) -> Self {
        Self {
            inserted: OffsetDateTime::now_utc(),
            data,
            checksums: None,
            properties: Properties::new(),
        }
    }
}

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Handles returned
/// by [`authorize()`](StorageBackend::authorize) share the same files, write
/// counter and credential log, so tests can inspect what a request did.
///
/// # Examples
///
/// ```
/// use depot_storage::backend::MockBackend;
/// use depot_storage::StorageBackend;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("_cache/api/v3/collections/data.json", b"{}"),
/// ]);
/// assert!(backend.exists(Path::new("_cache/api/v3/collections/data.json")).await?);
///
/// backend.write(Path::new("other.json"), b"[]").await?;
/// assert_eq!(backend.writes(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    storage: Arc<RwLock<HashMap<PathBuf, MockFile>>>,
    reject_inline_properties: bool,
    writes: Arc<AtomicUsize>,
    credentials: Arc<Mutex<Vec<Option<Credential>>>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files (no properties).
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, MockFile::new(data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: Arc::new(RwLock::new(map)),
            reject_inline_properties: false,
            writes: Arc::new(AtomicUsize::new(0)),
            credentials: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Behave like a store that can't take properties in the deploy call.
    pub fn rejecting_inline_properties(mut self) -> Self {
        self.reject_inline_properties = true;
        self
    }

    /// Number of successful blob and property writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every credential passed to [`authorize()`](StorageBackend::authorize),
    /// in call order.
    pub fn credentials(&self) -> Vec<Option<Credential>> {
        self.credentials.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    fn file_info(path: &Path, file: &MockFile) -> FileInfo {
        let info = FileInfo::new(path, file.data.len() as u64, file.inserted, file.inserted)
            .with_mime_type(guess_mime_type(path));
        match &file.checksums {
            Some(checksums) => info.with_checksums(checksums.clone()),
            None => info,
        }
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                let mut entries: Vec<_> = guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, file)| Self::file_info(path, file))
                    .collect();
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                entries
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let file = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(Self::file_info(&path, file))
    }

    async fn properties(&self, path: &Path) -> Result<Properties> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let file = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(file.properties.clone())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let file = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(file.data.clone())
    }

    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead> {
        Ok(Box::pin(Cursor::new(self.read(path).await?)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.insert(path, MockFile::new(data.to_vec()));
        self.record_write();
        Ok(())
    }

    async fn deploy(
        &self,
        path: &Path,
        mut content: Content,
        checksums: &Checksums,
        properties: Option<&Properties>,
    ) -> Result<()> {
        let path = validate_path(path)?;
        if self.reject_inline_properties && properties.is_some() {
            exn::bail!(ErrorKind::PropertiesRejected(path));
        }
        let mut data = Vec::with_capacity(usize::try_from(content.size).unwrap_or_default());
        content.reader.read_to_end(&mut data).await.map_err(ErrorKind::Io)?;
        let file = MockFile {
            checksums: Some(checksums.clone()),
            properties: properties.cloned().unwrap_or_default(),
            ..MockFile::new(data)
        };
        self.storage.write().await.insert(path, file);
        self.record_write();
        Ok(())
    }

    async fn set_properties(&self, path: &Path, properties: &Properties) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        let file = guard.get_mut(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        file.properties = properties.clone();
        self.record_write();
        Ok(())
    }

    fn authorize(&self, credential: Option<&Credential>) -> BackendHandle {
        if let Ok(mut seen) = self.credentials.lock() {
            seen.push(credential.cloned());
        }
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Properties {
        [("namespace", "ns"), ("name", "name"), ("version", "1.0.0")].into_iter().collect()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("test.txt"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("test.txt")).await.unwrap(), b"hello");
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_deploy_with_properties() {
        let backend = MockBackend::default();
        let path = Path::new("ns-name-1.0.0.tar.gz");
        backend.deploy(path, b"data".into(), &Checksums::default(), Some(&identity())).await.unwrap();
        assert_eq!(backend.properties(path).await.unwrap(), identity());
        assert_eq!(backend.stat(path).await.unwrap().checksums, Some(Checksums::default()));
    }

    #[tokio::test]
    async fn test_rejecting_inline_properties() {
        let backend = MockBackend::default().rejecting_inline_properties();
        let path = Path::new("ns-name-1.0.0.tar.gz");
        let err = backend.deploy(path, b"data".into(), &Checksums::default(), Some(&identity())).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PropertiesRejected(_)));
        assert_eq!(backend.writes(), 0);
        assert!(!backend.exists(path).await.unwrap());

        backend.deploy(path, b"data".into(), &Checksums::default(), None).await.unwrap();
        backend.set_properties(path, &identity()).await.unwrap();
        assert_eq!(backend.properties(path).await.unwrap(), identity());
        assert_eq!(backend.writes(), 2);
    }

    #[tokio::test]
    async fn test_authorized_handles_share_storage() {
        let backend = MockBackend::default();
        let handle = backend.authorize(Some(&Credential::AccessToken("t".to_string())));
        handle.write(Path::new("shared.txt"), b"x").await.unwrap();
        assert!(backend.exists(Path::new("shared.txt")).await.unwrap());
        assert_eq!(backend.credentials(), vec![Some(Credential::AccessToken("t".to_string()))]);
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([
            ("_cache/api/v3/data.json", Vec::from(*b"{}")),
            ("_cache/api/v2/data.json", Vec::from(*b"{}")),
            ("ns-name-1.0.0.tar.gz", Vec::from(*b"c")),
        ]);
        let files = backend.list(Some(Path::new("_cache"))).await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("_cache/api/v2/data.json"), PathBuf::from("_cache/api/v3/data.json")]);
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
