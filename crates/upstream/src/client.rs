use crate::error::{ErrorKind, Result};
use crate::request::InboundRequest;
use crate::retry::{RetryPolicy, retry_send};
use crate::rewrite::{self, DOWNLOAD_HINT};
use bytes::Bytes;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT: &str = "application/json, */*";

/// Headers that describe the inbound connection rather than the request.
const NOT_FORWARDED: [header::HeaderName; 8] = [
    header::AUTHORIZATION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::TE,
    header::UPGRADE,
    // Responses are parsed here, so they must arrive uncompressed.
    header::ACCEPT_ENCODING,
];

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An artifact being streamed from upstream.
///
/// The body stream owns the connection; dropping it releases the connection.
pub struct UpstreamDownload {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl fmt::Debug for UpstreamDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamDownload")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Client for the upstream registry that the gateway federates reads with.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    root: Url,
    page_size: u32,
    retry: RetryPolicy,
    /// Hosts a download hint may point at. Always includes the upstream host.
    download_hosts: BTreeSet<String>,
}

impl UpstreamClient {
    pub fn new(root: &str, page_size: u32, timeout: Duration) -> Result<Self> {
        let root = Url::parse(root).or_raise(|| ErrorKind::InvalidUrl(root.to_string()))?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .or_raise(|| ErrorKind::Transport)?;
        let download_hosts = root.host_str().map(str::to_ascii_lowercase).into_iter().collect();
        Ok(Self {
            http,
            root: rewrite::normalize_root(root),
            page_size,
            retry: RetryPolicy::default(),
            download_hosts,
        })
    }

    /// Also accept download hints for `hosts` (artifact CDNs the upstream
    /// links to).
    pub fn with_download_hosts(mut self, hosts: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.download_hosts.extend(hosts.into_iter().map(|host| host.as_ref().to_ascii_lowercase()));
        self
    }

    fn download_hint(&self, hint: &str) -> Result<Url> {
        let url = Url::parse(hint).or_raise(|| ErrorKind::InvalidUrl(hint.to_string()))?;
        let trusted = matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|host| self.download_hosts.contains(&host.to_ascii_lowercase()));
        if !trusted {
            tracing::warn!(hint = %url, "Refusing download hint for an untrusted host");
            exn::bail!(ErrorKind::UntrustedHost(url.host_str().unwrap_or_default().to_string()));
        }
        Ok(url)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upstream root, always ending with `/`.
    pub fn root(&self) -> &Url {
        &self.root
    }

    fn headers(inbound: &HeaderMap) -> HeaderMap {
        let mut headers = inbound.clone();
        for name in &NOT_FORWARDED {
            headers.remove(name);
        }
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers
    }

    async fn send(&self, method: &Method, url: &Url, request: &InboundRequest) -> Result<reqwest::Response> {
        let headers = Self::headers(&request.headers);
        let response = retry_send(&self.retry, method, || {
            self.http
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .body(request.body.clone())
                .send()
        })
        .await
        .or_raise(|| ErrorKind::Transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%url, status = status.as_u16(), body = %body, "Upstream results not available");
        } else {
            tracing::warn!(%url, status = status.as_u16(), body = %body, "Upstream results not available");
        }
        exn::bail!(ErrorKind::Status { status: status.as_u16(), body });
    }

    /// Forward an API request upstream and return its rewritten JSON
    /// response.
    pub async fn proxy(&self, request: &InboundRequest) -> Result<Value> {
        let url = rewrite::with_pagination(rewrite::to_upstream(request, &self.root)?, self.page_size);
        tracing::info!(from = %request.url, to = %url, "Rewriting request to upstream");
        let response = self.send(&request.method, &url, request).await?;
        let bytes = response.bytes().await.or_raise(|| ErrorKind::Transport)?;
        let document: Value = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::InvalidBody)?;
        Ok(rewrite::rewrite_response(document, self.root.as_str(), request.root.as_str()))
    }

    /// Stream an artifact from upstream.
    ///
    /// If the request carries a download hint, the hinted URL is fetched,
    /// provided its host is the upstream's or one of the configured download
    /// hosts. Otherwise the request URL is moved onto the upstream root.
    pub async fn proxy_download(&self, request: &InboundRequest) -> Result<UpstreamDownload> {
        let url = match request.query(DOWNLOAD_HINT) {
            Some(hint) => self.download_hint(&hint)?,
            None => rewrite::to_upstream(request, &self.root)?,
        };
        tracing::info!(from = %request.url, to = %url, "Proxying download from upstream");
        let response = self.send(&Method::GET, &url, request).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        let body = response.bytes_stream().map(|chunk| chunk.or_raise(|| ErrorKind::Transport)).boxed();
        Ok(UpstreamDownload { content_type, content_length, body })
    }
}
