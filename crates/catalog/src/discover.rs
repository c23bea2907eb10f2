//! Catalog discovery.
//!
//! Walks the content store and turns every archive whose property bag
//! identifies a collection into an [`ArtifactRecord`]. A broken entry is
//! logged and skipped; it never ends the scan.

use crate::properties::CollectionProperties;
use crate::record::ArtifactRecord;
use async_stream::stream;
use depot_storage::{FileInfo, StorageBackend, is_reserved};
use futures::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Which records [`discover()`] yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    /// Skip entries whose file name already rules them out, before any
    /// further store calls.
    pub fast_detection: bool,
}

impl Filter {
    /// Match everything.
    pub fn all() -> Self {
        Self { fast_detection: true, ..Self::default() }
    }

    pub fn collection(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: Some(name.into()),
            ..Self::all()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_fast_detection(mut self, enabled: bool) -> Self {
        self.fast_detection = enabled;
        self
    }

    pub fn matches(&self, namespace: &str, name: &str, version: &str) -> bool {
        let field = |wanted: &Option<String>, actual: &str| wanted.as_deref().is_none_or(|wanted| wanted == actual);
        field(&self.namespace, namespace) && field(&self.name, name) && field(&self.version, version)
    }
}

/// Split a `{namespace}-{name}-{version}.tar.gz` file name into its parts.
///
/// Namespaces and names can't contain `-`; versions can (prereleases).
///
/// ```
/// use depot_catalog::parse_filename;
///
/// assert_eq!(parse_filename("ns-name-1.0.0-beta.1.tar.gz"), Some(("ns", "name", "1.0.0-beta.1")));
/// assert_eq!(parse_filename("data.json"), None);
/// ```
pub fn parse_filename(filename: &str) -> Option<(&str, &str, &str)> {
    let stem = filename.strip_suffix(ARCHIVE_SUFFIX)?;
    let mut parts = stem.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(namespace), Some(name), Some(version)) => Some((namespace, name, version)),
        _ => None,
    }
}

/// Read the metadata of one listed entry and build its record.
///
/// `Ok(None)` means the entry is not a collection archive.
async fn inspect(backend: &dyn StorageBackend, path: &Path) -> depot_storage::error::Result<Option<ArtifactRecord>> {
    // Listings can be stale or incomplete; ask again.
    let info: FileInfo = backend.stat(path).await?;
    if info.is_dir {
        return Ok(None);
    }
    let properties = backend.properties(path).await?;
    let collection = match CollectionProperties::try_from(&properties) {
        Ok(collection) => collection,
        Err(e) => {
            tracing::trace!(path = %path.display(), reason = ?e, "Not a collection archive");
            return Ok(None);
        },
    };
    let Some(checksum) = info.checksums.as_ref().map(|checksums| checksums.sha256.clone()) else {
        tracing::warn!(path = %path.display(), "Collection archive has no recorded checksum; skipping");
        return Ok(None);
    };
    let record = ArtifactRecord::new(collection.namespace, collection.name, collection.version, checksum)
        .with_file(&info)
        .with_collection_info(collection.collection_info);
    Ok(Some(record))
}

/// Lazily discover collection archives in the store that match `filter`.
///
/// Each call starts a fresh scan.
///
/// ```no_run
/// use depot_catalog::{Catalog, Filter, discover};
/// # async fn example(backend: &dyn depot_storage::StorageBackend) {
/// let filter = Filter::collection("community", "general");
/// let catalog = Catalog::collect(discover(backend, &filter)).await;
/// # }
/// ```
pub fn discover<'a>(
    backend: &'a dyn StorageBackend,
    filter: &'a Filter,
) -> Pin<Box<dyn Stream<Item = ArtifactRecord> + Send + 'a>> {
    Box::pin(stream! {
        let mut listing = backend.list_stream(None);
        while let Some(entry) = listing.next().await {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = ?e, "Listing the store failed; ending scan");
                    break;
                },
            };
            if is_reserved(&entry.path) {
                continue;
            }
            if filter.fast_detection
                && let Some((namespace, name, version)) = entry.filename().and_then(parse_filename)
                && !filter.matches(namespace, name, version)
            {
                continue;
            }
            match inspect(backend, &entry.path).await {
                Ok(Some(record)) if filter.matches(record.namespace(), record.name(), record.version()) => {
                    yield record;
                },
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = ?e, "Unable to inspect store entry; skipping");
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_storage::backend::MockBackend;
    use depot_storage::{Checksums, Properties};
    use futures::StreamExt;
    use rstest::rstest;

    async fn publish(backend: &MockBackend, filename: &str, namespace: &str, name: &str, version: &str) {
        let collection = CollectionProperties::new(
            namespace,
            name,
            version,
            serde_json::json!({"namespace": namespace, "name": name, "version": version}),
        );
        let checksums = Checksums { sha256: format!("sha-{filename}"), ..Checksums::default() };
        backend.deploy(Path::new(filename), b"archive".into(), &checksums, Some(&Properties::from(&collection))).await.unwrap();
    }

    async fn fixture() -> MockBackend {
        let backend = MockBackend::default();
        publish(&backend, "ns-one-1.0.0.tar.gz", "ns", "one", "1.0.0").await;
        publish(&backend, "ns-one-1.1.0-beta.tar.gz", "ns", "one", "1.1.0-beta").await;
        publish(&backend, "ns-two-0.1.0.tar.gz", "ns", "two", "0.1.0").await;
        // Published under a name that doesn't follow the convention.
        publish(&backend, "uploads/renamed.tar.gz", "other", "three", "3.0.0").await;
        // No identity properties.
        backend.write(Path::new("README.md"), b"hello").await.unwrap();
        backend.write(Path::new("_cache/api/v3/collections/data.json"), b"{}").await.unwrap();
        backend
    }

    async fn fqcns(backend: &MockBackend, filter: Filter) -> Vec<String> {
        let mut found: Vec<String> =
            discover(backend, &filter).map(|record| format!("{}:{}", record.fqcn(), record.version())).collect().await;
        found.sort();
        found
    }

    #[rstest]
    #[case("ns-name-1.0.0.tar.gz", Some(("ns", "name", "1.0.0")))]
    #[case("ns-name-1.0.0-rc.1.tar.gz", Some(("ns", "name", "1.0.0-rc.1")))]
    #[case("ns-name.tar.gz", None)]
    #[case("ns-name-1.0.0.zip", None)]
    fn test_parse_filename(#[case] filename: &str, #[case] expected: Option<(&str, &str, &str)>) {
        assert_eq!(parse_filename(filename), expected);
    }

    #[rstest]
    #[case(Filter::all(), &["ns.one:1.0.0", "ns.one:1.1.0-beta", "ns.two:0.1.0", "other.three:3.0.0"])]
    #[case(Filter::collection("ns", "one"), &["ns.one:1.0.0", "ns.one:1.1.0-beta"])]
    #[case(Filter::collection("ns", "one").with_version("1.0.0"), &["ns.one:1.0.0"])]
    #[case(Filter::collection("other", "three"), &["other.three:3.0.0"])]
    #[case(Filter::collection("ns", "missing"), &[])]
    #[tokio::test]
    async fn test_discover(#[case] filter: Filter, #[case] expected: &[&str]) {
        let backend = fixture().await;
        assert_eq!(fqcns(&backend, filter.clone()).await, expected);
        // The fast filter is an optimisation only.
        assert_eq!(fqcns(&backend, filter.with_fast_detection(false)).await, expected);
    }

    #[tokio::test]
    async fn test_fast_filter_trusts_conventional_names() {
        let backend = MockBackend::default();
        // A misnamed archive is invisible to fast detection for the other identity.
        publish(&backend, "ns-one-1.0.0.tar.gz", "ns", "two", "1.0.0").await;
        assert!(fqcns(&backend, Filter::collection("ns", "two")).await.is_empty());
        assert_eq!(
            fqcns(&backend, Filter::collection("ns", "two").with_fast_detection(false)).await,
            vec!["ns.two:1.0.0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_record_carries_file_metadata() {
        let backend = fixture().await;
        let filter = Filter::collection("ns", "two");
        let records: Vec<_> = discover(&backend, &filter).collect().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].filename(), "ns-two-0.1.0.tar.gz");
        assert_eq!(records[0].checksum(), "sha-ns-two-0.1.0.tar.gz");
        assert_eq!(records[0].size(), 7);
        assert_eq!(records[0].collection_info()["version"], "0.1.0");
    }
}
