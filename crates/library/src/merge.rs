//! Combining the local catalog with upstream results.
//!
//! Local lookups always scan the store. Upstream is only consulted when a
//! federation is configured for the namespace, and always through the
//! federation cache. An upstream `404` counts as "upstream has nothing";
//! other upstream failures are tolerated when the store can answer.

use crate::Context;
use crate::error::{ErrorKind, Result};
use depot_catalog::{ArtifactRecord, Catalog, Filter, VersionGroup, discover};
use depot_upstream::error::ErrorKind as UpstreamErrorKind;
use depot_upstream::{DOWNLOAD_HINT, InboundRequest};
use futures::StreamExt;
use semver::Version;
use serde_json::Value;
use std::collections::BTreeSet;

/// Where an answer came from.
#[derive(Debug, Clone)]
pub enum Resolution<T> {
    Local(T),
    /// An upstream document, already rewritten onto the gateway.
    Federated(Value),
}

/// Local versions of a collection and the upstream version entries the
/// store doesn't have.
#[derive(Debug, Clone, Default)]
pub struct Versions {
    pub local: Option<VersionGroup>,
    pub federated: Vec<Value>,
}

impl Versions {
    pub fn len(&self) -> usize {
        self.local.as_ref().map_or(0, VersionGroup::len) + self.federated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn local_group(ctx: &Context, namespace: &str, name: &str) -> Result<Option<VersionGroup>> {
    let filter = ctx.filter(namespace, name);
    let catalog = Catalog::collect(discover(ctx.backend.as_ref(), &filter)).await;
    if catalog.len() > 1 {
        let found = catalog.groups().map(VersionGroup::fqcn).collect::<Vec<_>>().join(", ");
        exn::bail!(ErrorKind::AmbiguousIdentity(found));
    }
    Ok(catalog.into_groups().next())
}

/// Upstream's answer for this request, cache first. `None` if the namespace
/// isn't federated or upstream doesn't know the path.
async fn federated(ctx: &Context, request: &InboundRequest, namespace: &str) -> Result<Option<Value>> {
    let Some(federation) = ctx.federation_for(namespace) else {
        return Ok(None);
    };
    let cache = ctx.cache(federation);
    match cache.resolve(request.path(), || federation.upstream.proxy(request)).await {
        Ok(resolved) => {
            tracing::debug!(path = request.path(), outcome = %resolved.outcome, "Federated lookup");
            Ok(Some(resolved.payload))
        },
        Err(e) if matches!(&*e, UpstreamErrorKind::Status { status: 404, .. }) => Ok(None),
        Err(e) => Err(ErrorKind::upstream(e)),
    }
}

/// Like [`federated()`], but an upstream failure is only an error when
/// there's nothing local to answer with.
async fn federated_unless_local(
    ctx: &Context,
    request: &InboundRequest,
    namespace: &str,
    has_local: bool,
) -> Result<Option<Value>> {
    match federated(ctx, request, namespace).await {
        Err(e) if has_local => {
            tracing::warn!(path = request.path(), error = ?e, "Upstream unavailable; answering from the store");
            Ok(None)
        },
        result => result,
    }
}

fn upstream_latest(document: &Value) -> Option<Version> {
    let version = document
        .pointer("/highest_version/version")
        .or_else(|| document.pointer("/latest_version/version"))?
        .as_str()?;
    Version::parse(version).ok()
}

/// Items listed in an upstream versions page (`data` on v3, `results` on v2).
fn upstream_items(document: Value) -> Vec<Value> {
    match document {
        Value::Object(mut object) => match object.remove("data").or_else(|| object.remove("results")) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Resolve a single collection.
///
/// Upstream wins only when it advertises a latest version that ranks above
/// the local latest.
#[tracing::instrument(level = "debug", skip_all, fields(namespace = %namespace, name = %name))]
pub async fn collection(
    ctx: &Context,
    request: &InboundRequest,
    namespace: &str,
    name: &str,
) -> Result<Resolution<VersionGroup>> {
    let local = local_group(ctx, namespace, name).await?;
    let remote = federated_unless_local(ctx, request, namespace, local.is_some()).await?;
    match (local, remote) {
        (None, None) => exn::bail!(ErrorKind::NotFound),
        (None, Some(document)) => Ok(Resolution::Federated(document)),
        (Some(group), None) => Ok(Resolution::Local(group)),
        (Some(group), Some(document)) => {
            let newer = match (group.latest(), upstream_latest(&document)) {
                (Some(latest), Some(upstream)) => *latest < upstream,
                _ => false,
            };
            if newer {
                tracing::debug!(fqcn = %group.fqcn(), "Upstream has a newer version");
                Ok(Resolution::Federated(document))
            } else {
                Ok(Resolution::Local(group))
            }
        },
    }
}

/// Every version of a collection: the local ones, then upstream's entries
/// for versions the store doesn't have.
#[tracing::instrument(level = "debug", skip_all, fields(namespace = %namespace, name = %name))]
pub async fn versions(ctx: &Context, request: &InboundRequest, namespace: &str, name: &str) -> Result<Versions> {
    let local = local_group(ctx, namespace, name).await?;
    let remote = federated_unless_local(ctx, request, namespace, local.is_some()).await?;
    if local.is_none() && remote.is_none() {
        exn::bail!(ErrorKind::NotFound);
    }
    let mut known: BTreeSet<String> =
        local.iter().flat_map(VersionGroup::records).map(|record| record.version().to_string()).collect();
    let federated = remote
        .map(upstream_items)
        .unwrap_or_default()
        .into_iter()
        .filter(|item| match item.get("version").and_then(Value::as_str) {
            Some(version) => known.insert(version.to_string()),
            None => true,
        })
        .collect();
    Ok(Versions { local, federated })
}

/// A single version. Upstream results get a gateway download URL that
/// carries the upstream one, so the download can fill the store.
#[tracing::instrument(level = "debug", skip_all, fields(namespace = %namespace, name = %name, version = %version))]
pub async fn version(
    ctx: &Context,
    request: &InboundRequest,
    namespace: &str,
    name: &str,
    version: &str,
) -> Result<Resolution<ArtifactRecord>> {
    let filter = ctx.filter(namespace, name).with_version(version);
    if let Some(record) = discover(ctx.backend.as_ref(), &filter).next().await {
        return Ok(Resolution::Local(record));
    }
    let Some(mut document) = federated(ctx, request, namespace).await? else {
        exn::bail!(ErrorKind::NotFound);
    };
    annotate_download(&mut document, request);
    Ok(Resolution::Federated(document))
}

fn annotate_download(document: &mut Value, request: &InboundRequest) {
    let filename = document.pointer("/artifact/filename").and_then(Value::as_str);
    let upstream_url = document.get("download_url").and_then(Value::as_str);
    let (Some(filename), Some(upstream_url)) = (filename, upstream_url) else {
        tracing::warn!(path = request.path(), "Upstream version has no artifact to download");
        return;
    };
    let mut url = match request.root.join(&format!("download/{filename}")) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(filename, error = %e, "Unable to build a download URL; keeping upstream's");
            return;
        },
    };
    url.query_pairs_mut().append_pair(DOWNLOAD_HINT, upstream_url);
    document["download_url"] = Value::String(url.into());
}

/// Every collection in the store. Upstream isn't consulted for the full
/// listing.
pub async fn list(ctx: &Context) -> Catalog {
    let filter = Filter::all().with_fast_detection(ctx.options.fast_detection);
    Catalog::collect(discover(ctx.backend.as_ref(), &filter)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Federation;
    use depot_cache::CachePolicy;
    use depot_catalog::CollectionProperties;
    use depot_storage::backend::MockBackend;
    use depot_storage::{Checksums, Properties, StorageBackend};
    use depot_upstream::{RetryPolicy, UpstreamClient};
    use rstest::rstest;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ROOT: &str = "https://local.example/";

    async fn publish(backend: &MockBackend, namespace: &str, name: &str, version: &str) {
        let filename = format!("{namespace}-{name}-{version}.tar.gz");
        let collection = CollectionProperties::new(
            namespace,
            name,
            version,
            json!({"namespace": namespace, "name": name, "version": version}),
        );
        let checksums = Checksums { sha256: format!("sha-{filename}"), ..Checksums::default() };
        backend
            .deploy(Path::new(&filename), b"archive".into(), &checksums, Some(&Properties::from(&collection)))
            .await
            .unwrap();
    }

    fn request(path: &str) -> InboundRequest {
        InboundRequest::get(Url::parse(ROOT).unwrap().join(path).unwrap(), Url::parse(ROOT).unwrap())
    }

    fn local(backend: &MockBackend) -> Context {
        Context::new(Arc::new(backend.clone()))
    }

    fn federated_ctx(backend: &MockBackend, server: &MockServer) -> Context {
        let upstream = UpstreamClient::new(&server.uri(), 100, Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy::none());
        local(backend).with_federation(Federation::new(upstream, CachePolicy::default()).without_namespaces(["private"]))
    }

    async fn upstream_answers(server: &MockServer, at: &str, status: u16, body: Value) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_local_collection_latest() {
        let backend = MockBackend::default();
        for version in ["0.1.0", "1.0.0", "1.1.0-beta"] {
            publish(&backend, "ns", "name", version).await;
        }
        let resolution =
            collection(&local(&backend), &request("api/v3/collections/ns/name/"), "ns", "name").await.unwrap();
        let Resolution::Local(group) = resolution else { panic!("expected a local answer") };
        assert_eq!(group.latest().unwrap().version(), "1.0.0");
        assert_eq!(group.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let backend = MockBackend::default();
        let err =
            collection(&local(&backend), &request("api/v3/collections/ns/name/"), "ns", "name").await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound);
    }

    #[rstest]
    #[case::newer_upstream("2.0.0", true)]
    #[case::older_upstream("0.9.0", false)]
    #[case::same_version("1.0.0", false)]
    #[case::upstream_prerelease("2.0.0-beta", false)]
    #[case::unparseable("latest", false)]
    #[tokio::test]
    async fn test_collection_prefers_newer_upstream(#[case] upstream_version: &str, #[case] federated: bool) {
        let server = MockServer::start().await;
        upstream_answers(
            &server,
            "/api/v3/collections/ns/name/",
            200,
            json!({"name": "name", "highest_version": {"version": upstream_version}}),
        )
        .await;
        let backend = MockBackend::default();
        publish(&backend, "ns", "name", "1.0.0").await;

        let resolution =
            collection(&federated_ctx(&backend, &server), &request("api/v3/collections/ns/name/"), "ns", "name")
                .await
                .unwrap();
        assert_eq!(matches!(resolution, Resolution::Federated(_)), federated);
    }

    #[tokio::test]
    async fn test_v2_latest_version() {
        let server = MockServer::start().await;
        upstream_answers(&server, "/api/v2/collections/ns/name/", 200, json!({"latest_version": {"version": "3.0.0"}}))
            .await;
        let backend = MockBackend::default();
        publish(&backend, "ns", "name", "1.0.0").await;
        let resolution =
            collection(&federated_ctx(&backend, &server), &request("api/v2/collections/ns/name/"), "ns", "name")
                .await
                .unwrap();
        assert!(matches!(resolution, Resolution::Federated(_)));
    }

    #[tokio::test]
    async fn test_upstream_only_collection_is_rewritten() {
        let server = MockServer::start().await;
        let upstream_href = format!("{}/api/v3/collections/ns/name/", server.uri());
        upstream_answers(&server, "/api/v3/collections/ns/name/", 200, json!({"id": 3, "href": upstream_href})).await;
        let backend = MockBackend::default();

        let resolution =
            collection(&federated_ctx(&backend, &server), &request("api/v3/collections/ns/name/"), "ns", "name")
                .await
                .unwrap();
        let Resolution::Federated(document) = resolution else { panic!("expected an upstream answer") };
        assert_eq!(document, json!({"href": "https://local.example/api/v3/collections/ns/name/"}));
    }

    #[tokio::test]
    async fn test_upstream_answers_are_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/collections/ns/name/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "name"})))
            .expect(1)
            .mount(&server)
            .await;
        let backend = MockBackend::default();
        let ctx = federated_ctx(&backend, &server);
        for _ in 0..2 {
            let resolution = collection(&ctx, &request("api/v3/collections/ns/name/"), "ns", "name").await.unwrap();
            assert!(matches!(resolution, Resolution::Federated(_)));
        }
        assert!(backend.exists(Path::new("_cache/api/v3/collections/ns/name/data.json")).await.unwrap());
    }

    #[tokio::test]
    async fn test_upstream_not_found() {
        let server = MockServer::start().await;
        upstream_answers(&server, "/api/v3/collections/ns/name/", 404, json!({"detail": "Not found."})).await;
        let backend = MockBackend::default();
        let err = collection(&federated_ctx(&backend, &server), &request("api/v3/collections/ns/name/"), "ns", "name")
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_tolerated_with_local_results() {
        let server = MockServer::start().await;
        upstream_answers(&server, "/api/v3/collections/ns/name/", 502, json!({"detail": "bad gateway"})).await;
        let backend = MockBackend::default();
        let ctx = federated_ctx(&backend, &server);

        let err = collection(&ctx, &request("api/v3/collections/ns/name/"), "ns", "name").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Upstream { status: Some(502), .. }));

        publish(&backend, "ns", "name", "1.0.0").await;
        let resolution = collection(&ctx, &request("api/v3/collections/ns/name/"), "ns", "name").await.unwrap();
        assert!(matches!(resolution, Resolution::Local(_)));
    }

    #[tokio::test]
    async fn test_excluded_namespace_skips_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
        let backend = MockBackend::default();
        let err = collection(
            &federated_ctx(&backend, &server),
            &request("api/v3/collections/private/name/"),
            "private",
            "name",
        )
        .await
        .unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_versions_union_prefers_local() {
        let server = MockServer::start().await;
        upstream_answers(
            &server,
            "/api/v3/collections/ns/name/versions/",
            200,
            json!({"meta": {"count": 3}, "data": [
                {"version": "1.0.0", "href": "upstream"},
                {"version": "2.0.0"},
                {"version": "3.0.0"},
            ]}),
        )
        .await;
        let backend = MockBackend::default();
        publish(&backend, "ns", "name", "0.1.0").await;
        publish(&backend, "ns", "name", "1.0.0").await;

        let versions = versions(
            &federated_ctx(&backend, &server),
            &request("api/v3/collections/ns/name/versions/"),
            "ns",
            "name",
        )
        .await
        .unwrap();
        assert_eq!(versions.local.as_ref().unwrap().len(), 2);
        assert_eq!(versions.federated, vec![json!({"version": "2.0.0"}), json!({"version": "3.0.0"})]);
        assert_eq!(versions.len(), 4);
    }

    #[tokio::test]
    async fn test_v2_versions_results() {
        let server = MockServer::start().await;
        upstream_answers(
            &server,
            "/api/v2/collections/ns/name/versions/",
            200,
            json!({"count": 1, "results": [{"version": "2.0.0"}]}),
        )
        .await;
        let backend = MockBackend::default();
        let versions = versions(
            &federated_ctx(&backend, &server),
            &request("api/v2/collections/ns/name/versions/"),
            "ns",
            "name",
        )
        .await
        .unwrap();
        assert!(versions.local.is_none());
        assert_eq!(versions.federated, vec![json!({"version": "2.0.0"})]);
    }

    #[tokio::test]
    async fn test_local_version() {
        let backend = MockBackend::default();
        publish(&backend, "ns", "name", "1.0.0").await;
        publish(&backend, "ns", "name", "1.1.0").await;
        let resolution = version(
            &local(&backend),
            &request("api/v3/collections/ns/name/versions/1.0.0/"),
            "ns",
            "name",
            "1.0.0",
        )
        .await
        .unwrap();
        let Resolution::Local(record) = resolution else { panic!("expected a local answer") };
        assert_eq!(record.checksum(), "sha-ns-name-1.0.0.tar.gz");

        let err = version(&local(&backend), &request("api/v3/collections/ns/name/versions/9.9.9/"), "ns", "name", "9.9.9")
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_federated_version_download_hint() {
        let server = MockServer::start().await;
        upstream_answers(
            &server,
            "/api/v3/collections/ns/name/versions/2.0.0/",
            200,
            json!({
                "version": "2.0.0",
                "artifact": {"filename": "ns-name-2.0.0.tar.gz"},
                "download_url": "https://cdn.example/ns-name-2.0.0.tar.gz",
            }),
        )
        .await;
        let backend = MockBackend::default();
        let resolution = version(
            &federated_ctx(&backend, &server),
            &request("api/v3/collections/ns/name/versions/2.0.0/"),
            "ns",
            "name",
            "2.0.0",
        )
        .await
        .unwrap();
        let Resolution::Federated(document) = resolution else { panic!("expected an upstream answer") };
        assert_eq!(
            document["download_url"],
            "https://local.example/download/ns-name-2.0.0.tar.gz?galactory_upstream_url=https%3A%2F%2Fcdn.example%2Fns-name-2.0.0.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_list_is_local_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
        let backend = MockBackend::default();
        publish(&backend, "ns", "one", "1.0.0").await;
        publish(&backend, "ns", "two", "1.0.0").await;
        let catalog = list(&federated_ctx(&backend, &server)).await;
        assert_eq!(catalog.len(), 2);
    }
}
