use super::{absolute, route, timestamp};
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::time::Instant;
use time::OffsetDateTime;

pub(super) fn router() -> Router<AppState> {
    route(Router::new(), "/health/v1/basic", get(basic))
}

/// Liveness only: answers without touching the store or upstream.
async fn basic(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let started = Instant::now();
    let href = state.root(&headers).map(|root| absolute(&root, "/health/v1/basic/"));
    let body = json!({
        "type": "basic",
        "elapsed_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "response_time": timestamp(OffsetDateTime::now_utc()),
        "custom_text": state.config.health.custom_text.clone().unwrap_or_default(),
        "href": href,
    });
    (
        [(CACHE_CONTROL, "no-cache, no-store, must-revalidate"), (PRAGMA, "no-cache"), (EXPIRES, "0")],
        Json(body),
    )
}
