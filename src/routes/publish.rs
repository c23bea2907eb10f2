use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use axum::http::HeaderMap;
use depot_library::{HashedSpool, Spooled, ingest};

/// The form `ansible-galaxy collection publish` sends.
struct Upload {
    filename: String,
    sha256: String,
    file: Spooled,
}

fn missing(field: &str) -> ApiError {
    ApiError::BadRequest(format!("missing form field: {field}"))
}

/// Spool a file field chunk by chunk, so the upload never sits in memory
/// whole.
async fn spool(mut field: Field<'_>) -> Result<Spooled, ApiError> {
    let mut spool = HashedSpool::new();
    while let Some(chunk) = field.chunk().await.map_err(ApiError::Multipart)? {
        spool.update(&chunk).map_err(ApiError::Spool)?;
    }
    spool.finish().map_err(ApiError::Spool)
}

impl Upload {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut sha256 = None;
        let mut file = None;
        while let Some(field) = multipart.next_field().await.map_err(ApiError::Multipart)? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("sha256") => sha256 = Some(field.text().await.map_err(ApiError::Multipart)?),
                Some("file") => {
                    let filename = field.file_name().unwrap_or_default().to_string();
                    file = Some((filename, spool(field).await?));
                },
                _ => tracing::debug!(field = ?name, "Ignoring form field"),
            }
        }
        let sha256 = sha256.ok_or_else(|| missing("sha256"))?;
        let (filename, file) = file.ok_or_else(|| missing("file"))?;
        Ok(Self { filename, sha256, file })
    }
}

/// Read a publish form and ingest the archive it carries.
pub(super) async fn receive(state: &AppState, headers: &HeaderMap, multipart: Multipart) -> Result<(), ApiError> {
    let upload = Upload::read(multipart).await?;
    tracing::debug!(filename = %upload.filename, size = upload.file.size, rolled = upload.file.is_rolled(), "Received upload");
    let ctx = state.context(headers, true);
    let format = ctx.options.upload_format;
    let reader = upload.file.reader().map_err(ApiError::Spool)?;
    let collection = ingest(&ctx, &upload.filename, reader, &upload.sha256, format).await?;
    tracing::info!(
        namespace = %collection.namespace,
        name = %collection.name,
        version = %collection.version,
        filename = %upload.filename,
        "Published collection"
    );
    Ok(())
}

