//! Local filesystem storage backend.
//!
//! Files are stored in a configured directory and accessed using `tokio::fs`.
//! Checksums and properties don't have a native home on a filesystem, so each
//! deployed file gets a JSON sidecar next to it (`<file>.depot.json`). Sidecars
//! are hidden from listings.

use crate::backend::{BoxAsyncRead, Content, FileInfoStream, guess_mime_type};
use crate::error::{ErrorKind, Result};
use crate::{BackendHandle, Checksums, Credential, FileInfo, Properties, StorageBackend, validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};
use tokio::io::AsyncWriteExt;

/// Suffix appended to a file's name to locate its metadata sidecar.
const SIDECAR_SUFFIX: &str = ".depot.json";

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksums: Option<Checksums>,
    #[serde(default)]
    properties: Properties,
}

/// Local filesystem storage backend.
///
/// All paths are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use depot_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/srv/depot")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating the root directory
    /// if it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute or is not a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once on startup; not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Validate a relative storage path and join it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        if !absolute.is_absolute() {
            exn::bail!(ErrorKind::BackendError(format!(
                "attempting to get relative path of non-absolute path `{:?}`",
                absolute
            )))
        }
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        Ok(validate_path(relative)?)
    }

    fn sidecar_path(absolute: &Path) -> PathBuf {
        let mut sidecar = absolute.as_os_str().to_owned();
        sidecar.push(SIDECAR_SUFFIX);
        PathBuf::from(sidecar)
    }

    fn is_sidecar(path: &Path) -> bool {
        path.file_name().and_then(|name| name.to_str()).is_some_and(|name| name.ends_with(SIDECAR_SUFFIX))
    }

    /// A missing sidecar is an empty one.
    async fn read_sidecar(&self, absolute: &Path) -> Result<Sidecar> {
        let sidecar_path = Self::sidecar_path(absolute);
        match fs::read(&sidecar_path).await {
            Ok(data) => Ok(serde_json::from_slice(&data).or_raise(|| {
                ErrorKind::BackendError(format!("corrupt metadata sidecar `{}`", sidecar_path.display()))
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(Self::map_io_error(e, &sidecar_path).into()),
        }
    }

    async fn write_sidecar(&self, absolute: &Path, sidecar: &Sidecar) -> Result<()> {
        let sidecar_path = Self::sidecar_path(absolute);
        let data = serde_json::to_vec_pretty(sidecar)
            .or_raise(|| ErrorKind::BackendError("unable to serialize metadata sidecar".to_string()))?;
        Ok(fs::write(&sidecar_path, data).await.map_err(|e| Self::map_io_error(e, &sidecar_path))?)
    }

    async fn create_parent(path: &Path, absolute: &Path) -> Result<()> {
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }

    /// Copy `content` into the file at `absolute`, replacing it.
    async fn stream_file(path: &Path, absolute: &Path, mut content: Content) -> Result<u64> {
        Self::create_parent(path, absolute).await?;
        let mut file = fs::File::create(absolute).await.map_err(|e| Self::map_io_error(e, path))?;
        let copied = tokio::io::copy(&mut content.reader, &mut file).await.map_err(|e| Self::map_io_error(e, path))?;
        // Flush the pending background write before the file is dropped.
        file.flush().await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(copied)
    }

    /// Re-use same data collection from file metadata for both list and stat functions
    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified: OffsetDateTime = metadata.modified().map_err(ErrorKind::Io)?.into();
        // Not every filesystem records a birth time.
        let created = metadata.created().map(Into::into).unwrap_or(modified);
        let info = FileInfo::new(path, metadata.len(), created, modified);
        Ok(match metadata.is_dir() {
            true => info.into_dir(),
            false => info.with_mime_type(guess_mime_type(path)),
        })
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Keeps the `?` operator usable inside the listing stream, where errors
    /// have to be yielded instead.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() && !Self::is_sidecar(&relative) {
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        // Sidecars, and what is most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        // Walk from the parent directory of the prefix so that a prefix whose
        // leaf doesn't exist yet (or is a file) doesn't error. The prefix
        // "_cache/api" starts in "_cache" and matches:
        // - [MATCH] "_cache/api/v3/data.json"
        // - [NOT MATCH] "_cache/apis/data.json" (Path::starts_with is component-based)
        let start_dir = validated_prefix
            .as_ref()
            .map(|prefix| self.root.join(prefix).parent().unwrap_or(&self.root).to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Asking for the contents of a directory that doesn't
                    // exist results in an empty list, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        let info = Self::metadata(path, metadata)?;
        if info.is_dir {
            return Ok(info);
        }
        Ok(match self.read_sidecar(&abs_path).await?.checksums {
            Some(checksums) => info.with_checksums(checksums),
            None => info,
        })
    }

    async fn properties(&self, path: &Path) -> Result<Properties> {
        let abs_path = self.absolute_path(path)?;
        if !fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Ok(self.read_sidecar(&abs_path).await?.properties)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Ok(Box::pin(file))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Self::create_parent(path, &abs_path).await?;
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    #[tracing::instrument(level = "debug", skip(self, content, checksums, properties), fields(backend = %self.name, size = content.size))]
    async fn deploy(
        &self,
        path: &Path,
        content: Content,
        checksums: &Checksums,
        properties: Option<&Properties>,
    ) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let expected = content.size;
        let written = Self::stream_file(path, &abs_path, content).await?;
        if written != expected {
            tracing::warn!(path = %path.display(), expected, written, "Deployed content size differs from the announced size");
        }
        let sidecar = Sidecar {
            checksums: Some(checksums.clone()),
            properties: properties.cloned().unwrap_or_default(),
        };
        self.write_sidecar(&abs_path, &sidecar).await
    }

    async fn set_properties(&self, path: &Path, properties: &Properties) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        if !fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let mut sidecar = self.read_sidecar(&abs_path).await?;
        sidecar.properties = properties.clone();
        self.write_sidecar(&abs_path, &sidecar).await
    }

    fn authorize(&self, _credential: Option<&Credential>) -> BackendHandle {
        Arc::new(self.clone())
    }
}
