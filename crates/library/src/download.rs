use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::ingest::publish;
use crate::spool::{HashedSpool, Spooled};
use depot_storage::error::ErrorKind as StorageErrorKind;
use depot_storage::{Content, FileInfo};
use depot_upstream::error::ErrorKind as UpstreamErrorKind;
use depot_upstream::{ByteStream, InboundRequest};
use exn::ResultExt;
use futures::StreamExt;
use std::path::Path;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Already in the store.
    Store,
    /// Fetched from upstream and written to the store before serving.
    Filled,
    /// Fetched from upstream and served without touching the store.
    Upstream,
}

/// A collection archive ready to be streamed to a client.
#[derive(Debug)]
pub struct Artifact {
    pub filename: String,
    pub mime_type: Option<String>,
    pub modified: Option<OffsetDateTime>,
    pub content: Content,
    pub source: Source,
}

async fn from_store(ctx: &Context, info: FileInfo, source: Source) -> Result<Artifact> {
    let reader = ctx.backend.reader(&info.path).await.map_err(ErrorKind::storage)?;
    Ok(Artifact {
        filename: info.filename().unwrap_or_default().to_string(),
        mime_type: info.mime_type,
        modified: Some(info.modified),
        content: Content { reader, size: info.size },
        source,
    })
}

async fn spool(mut body: ByteStream) -> Result<Spooled> {
    let mut spool = HashedSpool::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(ErrorKind::upstream)?;
        spool.update(&chunk).or_raise(|| ErrorKind::Storage { status: None, body: String::new() })?;
    }
    spool.finish().or_raise(|| ErrorKind::Storage { status: None, body: String::new() })
}

/// Serve `filename` from the store, filling it from upstream if it isn't
/// there yet.
///
/// With cache writes enabled, an upstream archive is published into the
/// store (identity read from its manifest) and served from there; otherwise
/// it is served straight from the download spool. Content is streamed in
/// both cases.
#[tracing::instrument(level = "debug", skip_all, fields(filename = %filename))]
pub async fn fill_download(ctx: &Context, request: &InboundRequest, filename: &str) -> Result<Artifact> {
    let path = Path::new(filename);
    match ctx.backend.stat(path).await {
        Ok(info) if !info.is_dir => return from_store(ctx, info, Source::Store).await,
        Ok(_) => exn::bail!(ErrorKind::NotFound),
        Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {},
        Err(e) => return Err(ErrorKind::storage(e)),
    }

    // Artifact names don't reliably carry a namespace, so namespace
    // exclusions don't apply here.
    let Some(federation) = ctx.federation.as_ref() else {
        exn::bail!(ErrorKind::NotFound);
    };
    let download = match federation.upstream.proxy_download(request).await {
        Ok(download) => download,
        Err(e) => {
            let kind = match &*e {
                UpstreamErrorKind::Status { status: 404, .. } => ErrorKind::NotFound,
                UpstreamErrorKind::UntrustedHost(host) => ErrorKind::UntrustedSource(host.clone()),
                _ => return Err(ErrorKind::upstream(e)),
            };
            return Err(e.raise(kind));
        },
    };
    let mime_type = download.content_type;
    let spooled = spool(download.body).await?;
    tracing::info!(filename, size = spooled.size, rolled = spooled.is_rolled(), "Downloaded from upstream");

    if !federation.policy.write {
        return Ok(Artifact {
            filename: filename.to_string(),
            mime_type,
            modified: None,
            content: spooled
                .content()
                .or_raise(|| ErrorKind::Storage { status: None, body: String::new() })?,
            source: Source::Upstream,
        });
    }
    publish(ctx, path, spooled).await?;
    let info = ctx.backend.stat(path).await.map_err(ErrorKind::storage)?;
    from_store(ctx, info, Source::Filled).await
}
