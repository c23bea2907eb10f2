//! Galaxy v2 API. Links are absolute.

use super::{absolute, download_url, publish, route, timestamp};
use crate::error::ApiError;
use crate::extract::Gateway;
use crate::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use depot_catalog::{ArtifactRecord, VersionGroup};
use depot_library::merge::{self, Resolution};
use serde_json::{Value, json};
use time::OffsetDateTime;
use url::Url;

pub(super) fn router() -> Router<AppState> {
    let router = route(
        Router::new(),
        "/api/v2/collections",
        get(collections).post(publish_collection),
    );
    let router = route(router, "/api/v2/collections/{namespace}/{name}", get(collection));
    let router = route(router, "/api/v2/collections/{namespace}/{name}/versions", get(versions));
    let router = route(router, "/api/v2/collections/{namespace}/{name}/versions/{version}", get(version));
    route(router, "/api/v2/collection-imports/0", get(import))
}

fn collection_path(namespace: &str, name: &str) -> String {
    format!("/api/v2/collections/{namespace}/{name}/")
}

fn version_path(namespace: &str, name: &str, version: &str) -> String {
    format!("/api/v2/collections/{namespace}/{name}/versions/{version}/")
}

fn item(group: &VersionGroup, root: &Url) -> Value {
    let (namespace, name) = (group.namespace(), group.name());
    let latest = group.latest();
    json!({
        "href": absolute(root, &collection_path(namespace, name)),
        "name": name,
        "namespace": {"name": namespace},
        "created": latest.map(|record| timestamp(record.created())),
        "modified": latest.map(|record| timestamp(record.modified())),
        "versions_url": absolute(root, &format!("/api/v2/collections/{namespace}/{name}/versions/")),
        "latest_version": latest.map(|record| json!({
            "href": absolute(root, &version_path(namespace, name, record.version())),
            "version": record.version(),
        })),
    })
}

fn version_entry(record: &ArtifactRecord, root: &Url) -> Value {
    json!({
        "href": absolute(root, &version_path(record.namespace(), record.name(), record.version())),
        "version": record.version(),
    })
}

fn version_detail(record: &ArtifactRecord, root: &Url, href: &Url) -> Value {
    json!({
        "artifact": {
            "filename": record.filename(),
            "sha256": record.checksum(),
            "size": record.size(),
        },
        "collection": {"name": record.name()},
        "namespace": {"name": record.namespace()},
        "download_url": download_url(root, record.filename()),
        "hidden": false,
        "href": href.as_str(),
        "id": 0,
        "metadata": record.collection_info(),
        "version": record.version(),
    })
}

async fn collections(Gateway { ctx, request }: Gateway) -> Json<Value> {
    let catalog = merge::list(&ctx).await;
    let results: Vec<Value> = catalog.groups().map(|group| item(group, &request.root)).collect();
    Json(json!({"results": results}))
}

async fn collection(
    Gateway { ctx, request }: Gateway,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(match merge::collection(&ctx, &request, &namespace, &name).await? {
        Resolution::Local(group) => item(&group, &request.root),
        Resolution::Federated(document) => document,
    }))
}

async fn versions(
    Gateway { ctx, request }: Gateway,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let versions = merge::versions(&ctx, &request, &namespace, &name).await?;
    let mut results: Vec<Value> = versions
        .local
        .iter()
        .flat_map(VersionGroup::records)
        .map(|record| version_entry(record, &request.root))
        .collect();
    results.extend(versions.federated);
    Ok(Json(json!({
        "count": results.len(),
        "next": null,
        "previous": null,
        "results": results,
    })))
}

async fn version(
    Gateway { ctx, request }: Gateway,
    Path((namespace, name, version)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(match merge::version(&ctx, &request, &namespace, &name, &version).await? {
        Resolution::Local(record) => version_detail(&record, &request.root, &request.url),
        Resolution::Federated(document) => document,
    }))
}

async fn publish_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let task = state.root(&headers).map(|root| absolute(&root, "/api/v2/collection-imports/0/"));
    publish::receive(&state, &headers, multipart).await?;
    Ok(Json(json!({"task": task})))
}

async fn import() -> Json<Value> {
    Json(json!({"state": "completed", "finished_at": timestamp(OffsetDateTime::now_utc())}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_links_are_absolute() {
        let root = Url::parse("http://galaxy.local:5555/").unwrap();
        let group = VersionGroup::from_record(ArtifactRecord::new("ns", "name", "1.2.0", "abc")).unwrap();
        let item = item(&group, &root);
        assert_eq!(item["href"], "http://galaxy.local:5555/api/v2/collections/ns/name/");
        assert_eq!(item["namespace"]["name"], "ns");
        assert_eq!(item["latest_version"]["version"], "1.2.0");
        assert_eq!(
            item["latest_version"]["href"],
            "http://galaxy.local:5555/api/v2/collections/ns/name/versions/1.2.0/"
        );
    }
}
