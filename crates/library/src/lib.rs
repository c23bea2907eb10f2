//! Collection library operations.
//!
//! Everything here works against a [`Context`]: the (already authorized)
//! content store, the optional upstream federation, and the options that
//! change how the store is read and written.
//!
//! - [`merge`] answers catalog lookups, combining the store with upstream;
//! - [`ingest()`] publishes an uploaded collection archive;
//! - [`fill_download()`] serves an artifact, pulling it from upstream into
//!   the store when it isn't there yet.

mod download;
pub mod error;
mod ingest;
pub mod merge;
mod spool;

pub use crate::download::{Artifact, Source, fill_download};
pub use crate::ingest::ingest;
pub use crate::spool::{CHUNK_SIZE, HashedSpool, SPOOL_SIZE, Spooled};
use depot_archive::UploadFormat;
use depot_cache::{CachePolicy, FederationCache};
use depot_catalog::Filter;
use depot_storage::BackendHandle;
use depot_upstream::UpstreamClient;
use std::collections::BTreeSet;

/// Behaviour switches that apply to every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Trust `{namespace}-{name}-{version}.tar.gz` file names to skip
    /// non-matching archives during discovery.
    pub fast_detection: bool,
    /// Always deploy without properties and set them afterwards.
    pub property_fallback: bool,
    pub upload_format: UploadFormat,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            fast_detection: true,
            property_fallback: false,
            upload_format: UploadFormat::Auto,
        }
    }
}

/// Upstream registry consulted for reads.
#[derive(Debug, Clone)]
pub struct Federation {
    pub upstream: UpstreamClient,
    pub policy: CachePolicy,
    /// Namespaces that are never looked up upstream.
    pub no_proxy_namespaces: BTreeSet<String>,
}

impl Federation {
    pub fn new(upstream: UpstreamClient, policy: CachePolicy) -> Self {
        Self { upstream, policy, no_proxy_namespaces: BTreeSet::new() }
    }

    pub fn without_namespaces(mut self, namespaces: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.no_proxy_namespaces.extend(namespaces.into_iter().map(Into::into));
        self
    }
}

#[derive(Clone)]
pub struct Context {
    pub backend: BackendHandle,
    pub federation: Option<Federation>,
    pub options: Options,
}

impl Context {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, federation: None, options: Options::default() }
    }

    pub fn with_federation(mut self, federation: Federation) -> Self {
        self.federation = Some(federation);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Same configuration, different store handle (typically one authorized
    /// for the current request).
    pub fn with_backend(&self, backend: BackendHandle) -> Self {
        Self { backend, ..self.clone() }
    }

    /// Federation to use for `namespace`, if any.
    pub fn federation_for(&self, namespace: &str) -> Option<&Federation> {
        self.federation.as_ref().filter(|federation| !federation.no_proxy_namespaces.contains(namespace))
    }

    /// Cache of upstream responses, stored alongside the collections.
    pub fn cache(&self, federation: &Federation) -> FederationCache {
        FederationCache::new(self.backend.clone(), federation.policy)
    }

    pub(crate) fn filter(&self, namespace: &str, name: &str) -> Filter {
        Filter::collection(namespace, name).with_fast_detection(self.options.fast_detection)
    }
}
