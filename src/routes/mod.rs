//! HTTP surface.
//!
//! | Prefix          | Module       |
//! |-----------------|--------------|
//! | `/`, `/api/`    | [`api`]      |
//! | `/health/v1/*`  | [`health`]   |
//! | `/api/v2/*`     | [`v2`]       |
//! | `/api/v3/*`     | [`v3`]       |
//! | `/download/*`   | [`download`] |
//!
//! Every route answers with and without a trailing slash.

mod api;
mod download;
mod health;
mod publish;
mod v2;
mod v3;

use crate::state::AppState;
use axum::Router;
use axum::routing::MethodRouter;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(api::router())
        .merge(health::router())
        .merge(v2::router())
        .merge(v3::router())
        .merge(download::router())
}

/// Register `path` both without and with a trailing slash.
fn route(router: Router<AppState>, path: &str, handler: MethodRouter<AppState>) -> Router<AppState> {
    router.route(path, handler.clone()).route(&format!("{path}/"), handler)
}

fn timestamp(at: OffsetDateTime) -> Value {
    at.format(&Rfc3339).map_or(Value::Null, Value::String)
}

/// `path` (absolute path, starting with `/`) as an absolute URL under
/// `root`.
fn absolute(root: &Url, path: &str) -> String {
    let relative = path.trim_start_matches('/');
    root.join(relative).map_or_else(|_| format!("{root}{relative}"), String::from)
}

fn download_url(root: &Url, filename: &str) -> String {
    absolute(root, &format!("/download/{filename}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute() {
        let root = Url::parse("https://local.example/").unwrap();
        assert_eq!(absolute(&root, "/api/v2/collections/ns/name/"), "https://local.example/api/v2/collections/ns/name/");
        assert_eq!(download_url(&root, "ns-name-1.0.0.tar.gz"), "https://local.example/download/ns-name-1.0.0.tar.gz");
    }

    #[test]
    fn test_timestamp() {
        let at = OffsetDateTime::from_unix_timestamp(1_704_164_645).unwrap();
        assert_eq!(timestamp(at), "2024-01-02T03:04:05Z");
    }
}
