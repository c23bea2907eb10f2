use crate::error::{ErrorKind, Result};
use crate::state::AppState;
use axum::body::{Body, Bytes, HttpBody, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use depot_config::Log;
use exn::ResultExt;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Bytes of a logged body that make it into the log line.
const BODY_PREVIEW: usize = 4096;
/// Bodies that may be larger than this are passed through unlogged.
const BODY_CAPTURE_LIMIT: usize = 64 * 1024;

/// Install the global subscriber: stdout, plus `log.file` when set.
pub fn init(log: &Log) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&log.level).or_raise(|| ErrorKind::Logging)?,
    };
    let file = match &log.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path).or_raise(|| ErrorKind::Logging)?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        },
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file)
        .try_init()
        .or_raise(|| ErrorKind::Logging)
}

fn redacted(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if *name == AUTHORIZATION {
                "<redacted>".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.to_string(), value)
        })
        .collect()
}

fn preview(body: &Bytes) -> String {
    String::from_utf8_lossy(&body[..body.len().min(BODY_PREVIEW)]).into_owned()
}

/// Archive transfers: publish forms and downloads.
fn carries_archive(uri: &Uri, headers: &HeaderMap) -> bool {
    uri.path().starts_with("/download/")
        || headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/"))
}

/// Buffer and log `body` if it is known to fit [`BODY_CAPTURE_LIMIT`];
/// otherwise hand it back untouched.
async fn capture(body: Body, kind: &str, method: &Method, uri: &Uri) -> std::result::Result<Body, axum::Error> {
    let upper = body.size_hint().upper();
    if !upper.is_some_and(|upper| upper <= BODY_CAPTURE_LIMIT as u64) {
        tracing::warn!(%method, %uri, kind, size = ?upper, limit = BODY_CAPTURE_LIMIT, "Body too large to log");
        return Ok(body);
    }
    let content = to_bytes(body, BODY_CAPTURE_LIMIT).await?;
    tracing::debug!(%method, %uri, kind, size = content.len(), body = preview(&content), "Body");
    Ok(Body::from(content))
}

/// Debug-log request and response headers and bodies, as configured.
/// Archive transfers never have their bodies captured.
pub async fn log_exchange(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (headers, body) = (state.config.log.headers, state.config.log.body);
    if !headers && !body {
        return next.run(request).await;
    }
    let (method, uri) = (request.method().clone(), request.uri().clone());
    if headers {
        tracing::debug!(%method, %uri, headers = ?redacted(request.headers()), "Request headers");
    }
    let body = body && !carries_archive(&uri, request.headers());
    let request = if body {
        let (parts, content) = request.into_parts();
        match capture(content, "request", &method, &uri).await {
            Ok(content) => Request::from_parts(parts, content),
            Err(e) => {
                tracing::warn!(%method, %uri, error = %e, "Unable to read request body");
                return StatusCode::BAD_REQUEST.into_response();
            },
        }
    } else {
        request
    };

    let response = next.run(request).await;
    if headers {
        tracing::debug!(%method, %uri, status = %response.status(), headers = ?redacted(response.headers()), "Response headers");
    }
    if !body {
        return response;
    }
    let (parts, content) = response.into_parts();
    match capture(content, "response", &method, &uri).await {
        Ok(content) => Response::from_parts(parts, content),
        Err(e) => {
            tracing::warn!(%method, %uri, error = %e, "Unable to read response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}
