//! Galaxy v3 API.
//!
//! Collection endpoints are served under both `/api/v3/collections/` and the
//! plugin index path newer clients use. Links in local documents are
//! root-relative and always point at the plugin index path.

use super::{download_url, publish, route, timestamp};
use crate::error::ApiError;
use crate::extract::Gateway;
use crate::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use depot_catalog::{ArtifactRecord, VersionGroup};
use depot_library::merge::{self, Resolution};
use depot_upstream::InboundRequest;
use serde_json::{Value, json};
use time::OffsetDateTime;
use url::Url;

const COLLECTIONS: &str = "/api/v3/collections";
const INDEX: &str = "/api/v3/plugin/ansible/content/published/collections/index";
const IMPORT: &str = "/api/v3/imports/collections/0/";

pub(super) fn router() -> Router<AppState> {
    let mut router = Router::new();
    for prefix in [COLLECTIONS, INDEX] {
        router = route(router, prefix, get(collections));
        router = route(router, &format!("{prefix}/{{namespace}}/{{name}}"), get(collection));
        router = route(router, &format!("{prefix}/{{namespace}}/{{name}}/versions"), get(versions));
        router = route(router, &format!("{prefix}/{{namespace}}/{{name}}/versions/{{version}}"), get(version));
    }
    let router = route(router, "/api/v3/artifacts/collections", post(publish_collection));
    route(router, "/api/v3/imports/collections/0", get(import))
}

fn collection_href(namespace: &str, name: &str) -> String {
    format!("{INDEX}/{namespace}/{name}/")
}

fn versions_href(namespace: &str, name: &str) -> String {
    format!("{INDEX}/{namespace}/{name}/versions/")
}

fn version_href(namespace: &str, name: &str, version: &str) -> String {
    format!("{INDEX}/{namespace}/{name}/versions/{version}/")
}

/// The request's own path and query, for pagination links.
fn this_url(request: &InboundRequest) -> String {
    match request.url.query() {
        Some(query) => format!("{}?{query}", request.path()),
        None => request.path().to_string(),
    }
}

/// A single, complete page of results.
fn page(request: &InboundRequest, data: Vec<Value>) -> Value {
    let this = this_url(request);
    json!({
        "meta": {"count": data.len()},
        "links": {"first": this, "previous": null, "next": null, "last": this},
        "data": data,
    })
}

fn summary(group: &VersionGroup) -> Value {
    let (namespace, name) = (group.namespace(), group.name());
    let latest = group.latest();
    json!({
        "href": collection_href(namespace, name),
        "name": name,
        "namespace": namespace,
        "deprecated": false,
        "created_at": latest.map(|record| timestamp(record.created())),
        "updated_at": latest.map(|record| timestamp(record.modified())),
        "versions_url": versions_href(namespace, name),
        "highest_version": latest.map(|record| json!({
            "href": version_href(namespace, name, record.version()),
            "version": record.version(),
        })),
    })
}

fn version_entry(record: &ArtifactRecord) -> Value {
    json!({
        "href": version_href(record.namespace(), record.name(), record.version()),
        "version": record.version(),
        "created_at": timestamp(record.created()),
        "updated_at": timestamp(record.modified()),
        "marks": [],
        "requires_ansible": null,
    })
}

fn version_detail(record: &ArtifactRecord, root: &Url) -> Value {
    let (namespace, name) = (record.namespace(), record.name());
    json!({
        "artifact": {
            "filename": record.filename(),
            "sha256": record.checksum(),
            "size": record.size(),
        },
        "collection": {
            "href": collection_href(namespace, name),
            "name": name,
        },
        "namespace": {"name": namespace},
        "download_url": download_url(root, record.filename()),
        "name": name,
        "signatures": [],
        "hidden": false,
        "href": version_href(namespace, name, record.version()),
        "id": 0,
        "metadata": record.collection_info(),
        "version": record.version(),
        "created_at": timestamp(record.created()),
        "updated_at": timestamp(record.modified()),
        "requires_ansible": null,
        "marks": [],
    })
}

async fn collections(gateway: Gateway) -> Json<Value> {
    let catalog = merge::list(&gateway.ctx).await;
    Json(page(&gateway.request, catalog.groups().map(summary).collect()))
}

async fn collection(
    Gateway { ctx, request }: Gateway,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(match merge::collection(&ctx, &request, &namespace, &name).await? {
        Resolution::Local(group) => summary(&group),
        Resolution::Federated(document) => document,
    }))
}

async fn versions(
    Gateway { ctx, request }: Gateway,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let versions = merge::versions(&ctx, &request, &namespace, &name).await?;
    let mut data: Vec<Value> = versions.local.iter().flat_map(VersionGroup::records).map(version_entry).collect();
    data.extend(versions.federated);
    Ok(Json(page(&request, data)))
}

async fn version(
    Gateway { ctx, request }: Gateway,
    Path((namespace, name, version)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(match merge::version(&ctx, &request, &namespace, &name, &version).await? {
        Resolution::Local(record) => version_detail(&record, &request.root),
        Resolution::Federated(document) => document,
    }))
}

async fn publish_collection(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    publish::receive(&state, &headers, multipart).await?;
    Ok(Json(json!({"task": IMPORT})))
}

/// Imports finish before the publish request returns.
async fn import() -> Json<Value> {
    Json(json!({"state": "completed", "finished_at": timestamp(OffsetDateTime::now_utc())}))
}
