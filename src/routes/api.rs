use super::route;
use crate::state::AppState;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

pub(super) fn router() -> Router<AppState> {
    let router = Router::new().route("/", get(index));
    route(router, "/api", get(api))
}

async fn index() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain")], "depot is running")
}

async fn api() -> Json<Value> {
    Json(json!({
        "available_versions": {"v2": "v2/", "v3": "v3/"},
        "current_version": "v2",
        "description": "GALAXY REST API",
    }))
}
