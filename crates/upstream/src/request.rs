use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;
use url::Url;

/// What the gateway received, independent of the HTTP framework that
/// received it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// Full URL of the request, including the query string.
    pub url: Url,
    /// Origin the gateway was reached at, e.g. `https://local.example/`.
    pub root: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn get(url: Url, root: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            root,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// First value of a query parameter.
    pub fn query(&self, key: &str) -> Option<String> {
        self.url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v.into_owned())
    }
}
