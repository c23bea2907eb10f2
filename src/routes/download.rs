use crate::error::ApiError;
use crate::extract::Gateway;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::Path;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use depot_library::{Artifact, fill_download};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio_util::io::ReaderStream;

const HTTP_DATE: &[BorrowedFormatItem<'_>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/download/{filename}", get(download))
}

fn http_date(at: OffsetDateTime) -> Option<HeaderValue> {
    let formatted = at.to_offset(UtcOffset::UTC).format(HTTP_DATE).ok()?;
    HeaderValue::from_str(&formatted).ok()
}

fn headers(artifact: &Artifact) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mime_type = artifact.mime_type.as_deref().unwrap_or("application/octet-stream");
    if let Ok(value) = HeaderValue::from_str(mime_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename={}", artifact.filename)) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    if let Some(value) = artifact.modified.and_then(http_date) {
        headers.insert(LAST_MODIFIED, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(artifact.content.size));
    headers
}

async fn download(Gateway { ctx, request }: Gateway, Path(filename): Path<String>) -> Result<Response, ApiError> {
    let artifact = fill_download(&ctx, &request, &filename).await?;
    tracing::debug!(filename, source = ?artifact.source, size = artifact.content.size, "Serving artifact");
    let headers = headers(&artifact);
    let body = Body::from_stream(ReaderStream::new(artifact.content.reader));
    Ok((headers, body).into_response())
}
