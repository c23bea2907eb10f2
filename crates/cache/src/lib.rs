//! Federation cache.
//!
//! Upstream responses are cached as JSON blobs in the same content store
//! that holds the collections, under `_cache/<request path>/data.json`. An
//! entry is either empty (missing, unreadable, or reads are disabled), fresh,
//! or expired; only a fresh entry is served without asking upstream. When
//! upstream fails and the entry is merely expired, the stale payload is
//! served instead.
//!
//! There is no coordination between concurrent misses for the same key: each
//! one fetches and the last write wins.

mod entry;
pub mod error;
mod policy;

pub use crate::entry::CacheEntry;
pub use crate::policy::{CachePolicy, ExpiryMode};
use crate::error::{ErrorKind, Result};
use depot_storage::error::ErrorKind as StorageErrorKind;
use depot_storage::{BackendHandle, CACHE_PREFIX};
use derive_more::Display;
use exn::ResultExt;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use time::UtcDateTime;

const ENTRY_FILENAME: &str = "data.json";

/// How a lookup was answered.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a fresh entry; upstream wasn't contacted.
    #[display("hit")]
    Hit,
    /// Fetched from upstream.
    #[display("miss")]
    Miss,
    /// Upstream failed; served from an expired entry.
    #[display("stale")]
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub payload: Value,
    pub outcome: CacheOutcome,
}

#[derive(Clone)]
pub struct FederationCache {
    backend: BackendHandle,
    policy: CachePolicy,
}

impl FederationCache {
    pub fn new(backend: BackendHandle, policy: CachePolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Store path of the entry for a request path.
    ///
    /// ```
    /// use std::path::Path;
    ///
    /// let key = depot_cache::FederationCache::key("/api/v3/collections/ns/name/");
    /// assert_eq!(key, Path::new("_cache/api/v3/collections/ns/name/data.json"));
    /// ```
    pub fn key(path: &str) -> PathBuf {
        Path::new(CACHE_PREFIX).join(path.trim_matches('/')).join(ENTRY_FILENAME)
    }

    async fn read(&self, key: &Path) -> Result<Option<CacheEntry>> {
        let bytes = match self.backend.read(key).await {
            Ok(bytes) => bytes,
            Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.raise(ErrorKind::Storage)),
        };
        Ok(Some(CacheEntry::from_slice(&bytes, &self.policy)?))
    }

    /// Load the entry for `path`. Anything that prevents reading it yields an
    /// empty entry.
    pub async fn load(&self, path: &str) -> CacheEntry {
        if !self.policy.read {
            return CacheEntry::default();
        }
        let key = Self::key(path);
        match self.read(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => CacheEntry::default(),
            Err(e) => {
                tracing::warn!(key = %key.display(), error = ?e, "Unreadable cache entry; treating as empty");
                CacheEntry::default()
            },
        }
    }

    async fn write(&self, key: &Path, entry: &CacheEntry) -> Result<()> {
        let bytes = entry.to_vec()?;
        self.backend.write(key, &bytes).await.or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }

    /// Persist a dirty entry if writes are enabled. Failures are logged.
    pub async fn persist(&self, path: &str, entry: &mut CacheEntry) {
        if !self.policy.write || !entry.is_dirty() {
            return;
        }
        let key = Self::key(path);
        match self.write(&key, entry).await {
            Ok(()) => entry.mark_clean(),
            Err(e) => tracing::warn!(key = %key.display(), error = ?e, "Unable to persist cache entry"),
        }
    }

    /// Answer a lookup for `path` from the cache, calling `fetch` for a fresh
    /// upstream payload when the entry is empty or expired.
    ///
    /// The upstream error is only returned when there is nothing cached to
    /// fall back on.
    pub async fn resolve<F, Fut, E>(&self, path: &str, fetch: F) -> std::result::Result<Resolved, exn::Exn<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, exn::Exn<E>>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut entry = self.load(path).await;
        let now = UtcDateTime::now();
        if entry.is_fresh(now) {
            tracing::info!(path, "Cache hit");
            return Ok(Resolved { payload: entry.into_payload(), outcome: CacheOutcome::Hit });
        }
        match fetch().await {
            Ok(payload) => {
                tracing::info!(path, "Cache miss");
                entry.replace(payload, now, self.policy.ttl);
                self.persist(path, &mut entry).await;
                Ok(Resolved { payload: entry.into_payload(), outcome: CacheOutcome::Miss })
            },
            Err(e) if !entry.is_empty() => {
                tracing::info!(path, error = ?e, "Cache hit (expired, upstream error)");
                Ok(Resolved { payload: entry.into_payload(), outcome: CacheOutcome::Stale })
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_storage::StorageBackend;
    use depot_storage::backend::MockBackend;
    use serde_json::json;
    use std::future::{Ready, ready};
    use std::sync::Arc;

    const PATH: &str = "/api/v3/collections/ns/name/";

    fn upstream(payload: Value) -> impl FnOnce() -> Ready<Result<Value>> {
        move || ready(Ok(payload))
    }

    fn unreachable_upstream() -> impl FnOnce() -> Ready<Result<Value>> {
        || ready(Err(exn::Exn::from(ErrorKind::Storage)))
    }

    fn cache(backend: &MockBackend, policy: CachePolicy) -> FederationCache {
        FederationCache::new(Arc::new(backend.clone()), policy)
    }

    async fn seed(backend: &MockBackend, created: &str, expires: &str) {
        let blob = json!({"data": {"cached": true}, "metadata": {"created": created, "expires": expires}});
        backend.write(&FederationCache::key(PATH), blob.to_string().as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let backend = MockBackend::default();
        let cache = cache(&backend, CachePolicy::default());

        let first = cache.resolve(PATH, upstream(json!({"v": 1}))).await.unwrap();
        assert_eq!(first, Resolved { payload: json!({"v": 1}), outcome: CacheOutcome::Miss });
        assert_eq!(backend.writes(), 1);

        let second = cache.resolve(PATH, unreachable_upstream()).await.unwrap();
        assert_eq!(second, Resolved { payload: json!({"v": 1}), outcome: CacheOutcome::Hit });
        assert_eq!(backend.writes(), 1);

        let blob: Value = serde_json::from_slice(&backend.read(&FederationCache::key(PATH)).await.unwrap()).unwrap();
        assert_eq!(blob["data"], json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let backend = MockBackend::default();
        seed(&backend, "2020-01-01T00:00:00.000000", "2020-01-01T01:00:00.000000").await;
        let cache = cache(&backend, CachePolicy::default());
        let resolved = cache.resolve(PATH, upstream(json!({"v": 2}))).await.unwrap();
        assert_eq!(resolved.outcome, CacheOutcome::Miss);
        assert_eq!(resolved.payload, json!({"v": 2}));
        assert_eq!(backend.writes(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_served_when_upstream_fails() {
        let backend = MockBackend::default();
        seed(&backend, "2020-01-01T00:00:00.000000", "2020-01-01T01:00:00.000000").await;
        let cache = cache(&backend, CachePolicy::default());
        let resolved = cache.resolve(PATH, unreachable_upstream()).await.unwrap();
        assert_eq!(resolved, Resolved { payload: json!({"cached": true}), outcome: CacheOutcome::Stale });
        // Stale payloads aren't written back.
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn test_empty_entry_propagates_upstream_failure() {
        let backend = MockBackend::default();
        let cache = cache(&backend, CachePolicy::default());
        let err = cache.resolve(PATH, unreachable_upstream()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_a_miss() {
        let backend = MockBackend::default();
        backend.write(&FederationCache::key(PATH), b"{ broken").await.unwrap();
        let cache = cache(&backend, CachePolicy::default());
        let resolved = cache.resolve(PATH, upstream(json!({"v": 3}))).await.unwrap();
        assert_eq!(resolved.outcome, CacheOutcome::Miss);
    }

    #[tokio::test]
    async fn test_write_disabled() {
        let backend = MockBackend::default();
        let cache = cache(&backend, CachePolicy { write: false, ..CachePolicy::default() });
        cache.resolve(PATH, upstream(json!({"v": 1}))).await.unwrap();
        let again = cache.resolve(PATH, upstream(json!({"v": 2}))).await.unwrap();
        assert_eq!(again.outcome, CacheOutcome::Miss);
        assert_eq!(again.payload, json!({"v": 2}));
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_read_disabled_always_fetches() {
        let backend = MockBackend::default();
        seed(&backend, "2999-01-01T00:00:00.000000", "2999-01-01T01:00:00.000000").await;
        let cache = cache(&backend, CachePolicy { read: false, ..CachePolicy::default() });
        let resolved = cache.resolve(PATH, upstream(json!({"v": 4}))).await.unwrap();
        assert_eq!(resolved.outcome, CacheOutcome::Miss);
        // Nothing to fall back on when reads are off.
        assert!(cache.resolve(PATH, unreachable_upstream()).await.is_err());
    }
}
