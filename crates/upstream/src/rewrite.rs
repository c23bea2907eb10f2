//! Rewriting between the gateway's URL space and upstream's.

use crate::error::{ErrorKind, Result};
use crate::request::InboundRequest;
use exn::{OptionExt, ResultExt};
use serde_json::{Map, Value};
use url::Url;

/// Query parameter carrying the upstream download URL of an artifact that
/// was listed from upstream but isn't in the store yet.
pub const DOWNLOAD_HINT: &str = "galactory_upstream_url";

/// Links to the legacy API can't be served by the gateway.
const LEGACY_API: &str = "api/v1";

/// Make sure a root URL ends with `/` so paths can be appended to it.
pub(crate) fn normalize_root(mut root: Url) -> Url {
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    root
}

/// Pagination parameter understood by a registry API path.
pub(crate) fn pagination_key(path: &str) -> &'static str {
    if path.contains("/api/v2/") { "page_size" } else { "limit" }
}

/// Move the inbound request URL from the gateway's root to upstream's,
/// keeping path and query.
pub(crate) fn to_upstream(request: &InboundRequest, upstream: &Url) -> Result<Url> {
    let relative = request
        .url
        .as_str()
        .strip_prefix(request.root.as_str())
        .ok_or_raise(|| ErrorKind::InvalidUrl(request.url.to_string()))?;
    let rewritten = format!("{}{relative}", upstream.as_str());
    Ok(Url::parse(&rewritten).or_raise(|| ErrorKind::InvalidUrl(rewritten.clone()))?)
}

/// Ask for `page_size` results per page unless the client already chose.
pub(crate) fn with_pagination(mut url: Url, page_size: u32) -> Url {
    let key = pagination_key(url.path());
    if !url.query_pairs().any(|(k, _)| k == key) {
        url.query_pairs_mut().append_pair(key, &page_size.to_string());
    }
    url
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Number(_))
}

fn rewrite_object(object: Map<String, Value>, upstream: &str, local: &str) -> Map<String, Value> {
    let mut rewritten = Map::with_capacity(object.len());
    for (key, value) in object {
        let value = match value {
            _ if key == "download_url" => value,
            Value::String(s) if s.starts_with(upstream) => {
                if s.contains(LEGACY_API) {
                    continue;
                }
                Value::String(format!("{local}{}", &s[upstream.len()..]))
            },
            v if (key == "id" || key == "download_count") && is_number(&v) => continue,
            v => rewrite_response(v, upstream, local),
        };
        rewritten.insert(key, value);
    }
    rewritten
}

/// Re-root an upstream response document onto the gateway.
///
/// Objects are walked recursively, as are objects inside arrays. Strings that
/// start with the upstream root are re-rooted onto `local`, or dropped if they
/// point at the legacy API. Numeric `id` and `download_count` fields are
/// dropped. `download_url` is left untouched.
///
/// ```
/// use serde_json::json;
///
/// let document = json!({
///     "download_url": "https://upstream.example/x",
///     "id": 5,
///     "nested": {"href": "https://upstream.example/y"},
/// });
/// let rewritten = depot_upstream::rewrite_response(document, "https://upstream.example/", "https://local.example/");
/// assert_eq!(rewritten, json!({
///     "download_url": "https://upstream.example/x",
///     "nested": {"href": "https://local.example/y"},
/// }));
/// ```
pub fn rewrite_response(document: Value, upstream: &str, local: &str) -> Value {
    match document {
        Value::Object(object) => Value::Object(rewrite_object(object, upstream, local)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(object) => Value::Object(rewrite_object(object, upstream, local)),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}
