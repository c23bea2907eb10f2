use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::spool::{HashedSpool, Spooled};
use depot_archive::error::ErrorKind as ArchiveErrorKind;
use depot_archive::{UploadFormat, read_manifest};
use depot_catalog::CollectionProperties;
use depot_storage::error::ErrorKind as StorageErrorKind;
use depot_storage::{Properties, is_reserved, validate_path};
use exn::ResultExt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Run synchronous archive work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .or_raise(|| ErrorKind::InvalidUpload("upload processing was interrupted".to_string()))?
}

fn target(filename: &str) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidUpload(format!("invalid file name '{filename}'"));
    let path = validate_path(filename).or_raise(invalid)?;
    if is_reserved(&path) {
        exn::bail!(invalid());
    }
    Ok(path)
}

fn spool_upload(upload: impl Read, format: UploadFormat) -> Result<Spooled> {
    let (detected, decoded) =
        format.decode(upload).or_raise(|| ErrorKind::InvalidUpload("unreadable upload".to_string()))?;
    tracing::debug!(format = %detected, "Decoding upload");
    HashedSpool::read_from(decoded).or_raise(|| ErrorKind::InvalidUpload(format!("invalid {detected} upload")))
}

fn manifest_properties(spooled: &Spooled) -> Result<CollectionProperties> {
    let reader = spooled.reader().or_raise(|| ErrorKind::ManifestParse)?;
    let manifest = match read_manifest(reader) {
        Ok(manifest) => manifest,
        Err(e) if matches!(&*e, ArchiveErrorKind::ManifestNotFound) => return Err(e.raise(ErrorKind::ManifestNotFound)),
        Err(e) => return Err(e.raise(ErrorKind::ManifestParse)),
    };
    let info = manifest.collection_info;
    let collection_info = serde_json::to_value(&info).or_raise(|| ErrorKind::ManifestParse)?;
    Ok(CollectionProperties::new(info.namespace, info.name, info.version, collection_info))
}

fn unreadable_spool() -> ErrorKind {
    ErrorKind::Storage { status: None, body: String::new() }
}

/// Deploy with inline properties, falling back to a property-less deploy
/// followed by a separate property update. Each attempt streams the spool
/// from the start.
async fn store(ctx: &Context, path: &Path, spooled: &Spooled, properties: &Properties) -> Result<()> {
    let backend = &ctx.backend;
    if !ctx.options.property_fallback {
        let content = spooled.content().or_raise(unreadable_spool)?;
        match backend.deploy(path, content, &spooled.checksums, Some(properties)).await {
            Ok(()) => return Ok(()),
            Err(e) if matches!(&*e, StorageErrorKind::PropertiesRejected(_)) => {
                tracing::warn!(path = %path.display(), "Store rejected inline properties; setting them separately");
            },
            Err(e) => return Err(ErrorKind::storage(e)),
        }
    }
    let content = spooled.content().or_raise(unreadable_spool)?;
    backend.deploy(path, content, &spooled.checksums, None).await.map_err(ErrorKind::storage)?;
    backend.set_properties(path, properties).await.map_err(ErrorKind::storage)?;
    Ok(())
}

/// Read the manifest of a spooled archive and deploy it at `path` with the
/// identity properties it declares.
pub(crate) async fn publish(ctx: &Context, path: &Path, spooled: Spooled) -> Result<(CollectionProperties, Spooled)> {
    let (collection, spooled) = blocking(move || Ok((manifest_properties(&spooled)?, spooled))).await?;
    store(ctx, path, &spooled, &Properties::from(&collection)).await?;
    tracing::info!(
        path = %path.display(),
        fqcn = collection.fqcn.as_deref().unwrap_or_default(),
        version = %collection.version,
        size = spooled.size,
        "Published collection"
    );
    Ok((collection, spooled))
}

/// Publish an uploaded collection archive.
///
/// The upload is decoded from its transport `format`, hashed and spooled in
/// one pass. Nothing is written unless its sha256 matches `declared_sha256`.
/// The manifest inside the archive decides the identity properties the
/// archive is deployed with.
#[tracing::instrument(level = "debug", skip_all, fields(filename = %filename))]
pub async fn ingest<R>(
    ctx: &Context,
    filename: &str,
    upload: R,
    declared_sha256: &str,
    format: UploadFormat,
) -> Result<CollectionProperties>
where
    R: Read + Send + 'static,
{
    let path = target(filename)?;
    let spooled = blocking(move || spool_upload(upload, format)).await?;
    if !spooled.sha256().eq_ignore_ascii_case(declared_sha256.trim()) {
        exn::bail!(ErrorKind::ChecksumMismatch {
            declared: declared_sha256.to_string(),
            calculated: spooled.sha256().to_string(),
        });
    }
    Ok(publish(ctx, &path, spooled).await?.0)
}
