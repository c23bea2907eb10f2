//! Artifactory-compatible HTTP storage backend.
//!
//! Blob content lives at `<base>/<repository>/<path>`, metadata at
//! `<base>/api/storage/<repository>/<path>`. Properties travel as matrix
//! parameters on deploy, or through the storage API's `?properties` query.
//!
//! Calls are not retried here; a failed store call fails the operation.

use crate::backend::{BoxAsyncRead, Content, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::{BackendHandle, Checksums, Credential, FileInfo, Properties, StorageBackend, validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::io::{ReaderStream, StreamReader};
use url::Url;

const API_KEY_HEADER: &str = "X-JFrog-Art-Api";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    files: Vec<ListEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntry {
    uri: String,
    #[serde(default)]
    size: u64,
    last_modified: String,
    #[serde(default)]
    folder: bool,
}

/// Artifactory reports file sizes as strings in some responses and numbers
/// in others.
#[derive(Deserialize)]
#[serde(untagged)]
enum Size {
    Number(u64),
    Text(String),
}
impl Size {
    fn value(&self) -> u64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.parse().unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatResponse {
    created: String,
    last_modified: String,
    size: Option<Size>,
    mime_type: Option<String>,
    checksums: Option<StatChecksums>,
    /// Only folders have children.
    children: Option<Vec<serde::de::IgnoredAny>>,
}

#[derive(Deserialize)]
struct StatChecksums {
    #[serde(default)]
    md5: String,
    #[serde(default)]
    sha1: String,
    #[serde(default)]
    sha256: String,
}

#[derive(Deserialize)]
struct PropertiesResponse {
    #[serde(default)]
    properties: BTreeMap<String, Vec<String>>,
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime> {
    Ok(OffsetDateTime::parse(value, &Rfc3339)
        .or_raise(|| ErrorKind::BackendError(format!("unparseable timestamp `{value}`")))?)
}

/// Encode a property bag the way Artifactory expects in matrix parameters
/// and the `?properties=` query: `key=v1,v2;key2=v3`, with the separators
/// backslash-escaped inside values, then percent-encoded.
fn encode_properties(properties: &Properties) -> String {
    properties
        .iter()
        .map(|(key, values)| {
            let values: Vec<String> = values
                .iter()
                .map(|value| {
                    let mut escaped = String::with_capacity(value.len());
                    for c in value.chars() {
                        if matches!(c, '\\' | ',' | '|' | '=' | ';') {
                            escaped.push('\\');
                        }
                        escaped.push(c);
                    }
                    utf8_percent_encode(&escaped, NON_ALPHANUMERIC).to_string()
                })
                .collect();
            format!("{}={}", utf8_percent_encode(key, NON_ALPHANUMERIC), values.join(","))
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Artifactory (or compatible) repository backend.
///
/// # Examples
///
/// ```no_run
/// use depot_storage::backend::ArtifactoryBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = ArtifactoryBackend::new(
///     "artifactory",
///     "https://artifactory.example.com/artifactory/",
///     "ansible-collections",
///     Some("published"),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ArtifactoryBackend {
    name: String,
    client: Client,
    base: Url,
    repository: String,
    prefix: Vec<String>,
    credential: Option<Credential>,
}

impl ArtifactoryBackend {
    /// Create a backend for `repository` on the Artifactory instance at
    /// `base` (the URL that `api/storage` is relative to), optionally rooted
    /// at a folder inside the repository.
    pub fn new(name: impl Into<String>, base: &str, repository: impl Into<String>, prefix: Option<&str>) -> Result<Self> {
        let base = Url::parse(base).or_raise(|| ErrorKind::BackendError(format!("invalid store URL `{base}`")))?;
        if base.cannot_be_a_base() {
            exn::bail!(ErrorKind::BackendError(format!("store URL `{base}` cannot have paths")));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ErrorKind::BackendError(e.to_string()))?;
        let prefix = match prefix {
            Some(prefix) => validate_path(prefix)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect(),
            None => Vec::new(),
        };
        Ok(Self {
            name: name.into(),
            client,
            base,
            repository: repository.into(),
            prefix,
            credential: None,
        })
    }

    /// URL of `path` (or the repository root) inside the repository, either
    /// the blob itself or its `api/storage` metadata.
    fn url(&self, storage_api: bool, path: Option<&Path>) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ErrorKind::BackendError(format!("store URL `{}` cannot have paths", self.base)))?;
            segments.pop_if_empty();
            if storage_api {
                segments.extend(["api", "storage"]);
            }
            segments.push(&self.repository);
            segments.extend(&self.prefix);
            if let Some(path) = path {
                for component in path.components() {
                    segments.push(&component.as_os_str().to_string_lossy());
                }
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.credential {
            Some(Credential::AccessToken(token)) => request.bearer_auth(token),
            Some(Credential::ApiKey(key)) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        Ok(request.send().await.map_err(|e| ErrorKind::Network(e.to_string()))?)
    }

    /// Map a non-success response to the matching error.
    async fn check(response: Response, path: &Path) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), path = %path.display(), body = %body, "Store returned an error");
        exn::bail!(match status {
            StatusCode::NOT_FOUND => ErrorKind::NotFound(path.to_path_buf()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Http { status: status.as_u16(), body },
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
        Ok(response.json().await.map_err(|e| ErrorKind::BackendError(format!("unexpected store response: {e}")))?)
    }

    async fn list_folder(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        let mut url = self.url(true, prefix)?;
        url.set_query(Some("list&deep=1&listFolders=0"));
        let response = Self::send(self.request(Method::GET, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let listing: ListResponse = Self::json(Self::check(response, prefix.unwrap_or(Path::new(""))).await?).await?;
        let root = prefix.map(Path::to_path_buf).unwrap_or_default();
        listing
            .files
            .into_iter()
            .filter(|entry| !entry.folder)
            .map(|entry| {
                let modified = parse_timestamp(&entry.last_modified)?;
                let path = validate_path(root.join(entry.uri.trim_start_matches('/')))?;
                Ok(FileInfo::new(path, entry.size, modified, modified))
            })
            .collect()
    }
}

#[async_trait]
impl StorageBackend for ArtifactoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            // The storage API returns a deep listing in one document.
            match self.list_folder(validated_prefix.as_deref()).await {
                Ok(files) => for file in files { yield Ok(file); },
                Err(e) => yield Err(e),
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(backend = %self.name))]
    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let response = Self::send(self.request(Method::GET, self.url(true, Some(&path))?)).await?;
        let stat: StatResponse = Self::json(Self::check(response, &path).await?).await?;
        let created = parse_timestamp(&stat.created)?;
        let modified = parse_timestamp(&stat.last_modified)?;
        let info = FileInfo::new(path, stat.size.as_ref().map(Size::value).unwrap_or_default(), created, modified);
        if stat.children.is_some() {
            return Ok(info.into_dir());
        }
        let info = match stat.mime_type {
            Some(mime_type) => info.with_mime_type(mime_type),
            None => info,
        };
        Ok(match stat.checksums {
            Some(c) => info.with_checksums(Checksums { md5: c.md5, sha1: c.sha1, sha256: c.sha256 }),
            None => info,
        })
    }

    async fn properties(&self, path: &Path) -> Result<Properties> {
        let path = validate_path(path)?;
        let mut url = self.url(true, Some(&path))?;
        url.set_query(Some("properties"));
        let response = Self::send(self.request(Method::GET, url)).await?;
        // Artifactory answers 404 for a file that has no properties at all.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Properties::new());
        }
        let properties: PropertiesResponse = Self::json(Self::check(response, &path).await?).await?;
        Ok(properties.properties.into())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let response = Self::send(self.request(Method::GET, self.url(false, Some(&path))?)).await?;
        let response = Self::check(response, &path).await?;
        let bytes = response.bytes().await.map_err(|e| ErrorKind::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn reader(&self, path: &Path) -> Result<BoxAsyncRead> {
        let path = validate_path(path)?;
        let response = Self::send(self.request(Method::GET, self.url(false, Some(&path))?)).await?;
        let body = Self::check(response, &path).await?.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        let request = self.request(Method::PUT, self.url(false, Some(&path))?).body(data.to_vec());
        Self::check(Self::send(request).await?, &path).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, content, checksums, properties), fields(backend = %self.name, size = content.size))]
    async fn deploy(
        &self,
        path: &Path,
        content: Content,
        checksums: &Checksums,
        properties: Option<&Properties>,
    ) -> Result<()> {
        let path = validate_path(path)?;
        let mut url = self.url(false, Some(&path))?;
        if let Some(properties) = properties.filter(|p| !p.is_empty()) {
            let matrix = format!("{};{}", url.path(), encode_properties(properties));
            url.set_path(&matrix);
        }
        let request = self
            .request(Method::PUT, url)
            .header("X-Checksum-Md5", &checksums.md5)
            .header("X-Checksum-Sha1", &checksums.sha1)
            .header("X-Checksum-Sha256", &checksums.sha256)
            .header(CONTENT_LENGTH, content.size)
            .body(Body::wrap_stream(ReaderStream::new(content.reader)));
        let response = Self::send(request).await?;
        let status = response.status();
        // Oversized or unparseable matrix parameters.
        if properties.is_some() && matches!(status, StatusCode::BAD_REQUEST | StatusCode::URI_TOO_LONG) {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %body, "Store refused inline properties");
            exn::bail!(ErrorKind::PropertiesRejected(path));
        }
        Self::check(response, &path).await?;
        Ok(())
    }

    async fn set_properties(&self, path: &Path, properties: &Properties) -> Result<()> {
        let path = validate_path(path)?;
        let mut url = self.url(true, Some(&path))?;
        url.set_query(Some(&format!("properties={}&recursive=0", encode_properties(properties))));
        Self::check(Self::send(self.request(Method::PUT, url)).await?, &path).await?;
        Ok(())
    }

    fn authorize(&self, credential: Option<&Credential>) -> BackendHandle {
        Arc::new(Self { credential: credential.cloned(), ..self.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{body_bytes, header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend(server: &MockServer) -> ArtifactoryBackend {
        ArtifactoryBackend::new("art", &format!("{}/artifactory/", server.uri()), "repo", None).unwrap()
    }

    fn checksums() -> Checksums {
        Checksums { md5: "m".to_string(), sha1: "s1".to_string(), sha256: "s256".to_string() }
    }

    #[test]
    fn test_encode_properties_escapes_separators() {
        let properties: Properties = [("collection_info", "{\"a\":1,\"b\":2}"), ("fqcn", "ns.name")].into_iter().collect();
        let encoded = encode_properties(&properties);
        assert_eq!(encoded, "collection%5Finfo=%7B%22a%22%3A1%5C%2C%22b%22%3A2%7D;fqcn=ns%2Ename");
    }

    #[tokio::test]
    async fn test_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifactory/api/storage/repo"))
            .and(query_param("deep", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    {"uri": "/ns-name-1.0.0.tar.gz", "size": 10, "lastModified": "2024-01-02T03:04:05.000Z", "folder": false},
                    {"uri": "/_cache/api/v3/data.json", "size": 2, "lastModified": "2024-01-02T03:04:05.000Z", "folder": false}
                ]
            })))
            .mount(&server)
            .await;
        let files = backend(&server).await.list(None).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, PathBuf::from("ns-name-1.0.0.tar.gz"));
        assert_eq!(files[0].size, 10);
        assert_eq!(files[1].path, PathBuf::from("_cache/api/v3/data.json"));
    }

    #[tokio::test]
    async fn test_list_missing_folder_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        assert!(backend(&server).await.list(Some(Path::new("_cache"))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stat_file_and_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifactory/api/storage/repo/ns-name-1.0.0.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "created": "2024-01-02T03:04:05.000Z",
                "lastModified": "2024-01-03T03:04:05.000+01:00",
                "size": "1234",
                "mimeType": "application/x-gzip",
                "checksums": {"md5": "m", "sha1": "s1", "sha256": "s256"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/artifactory/api/storage/repo/folder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "created": "2024-01-02T03:04:05.000Z",
                "lastModified": "2024-01-02T03:04:05.000Z",
                "children": [{"uri": "/x", "folder": false}]
            })))
            .mount(&server)
            .await;
        let backend = backend(&server).await;
        let info = backend.stat(Path::new("ns-name-1.0.0.tar.gz")).await.unwrap();
        assert_eq!(info.size, 1234);
        assert!(!info.is_dir);
        assert_eq!(info.mime_type.as_deref(), Some("application/x-gzip"));
        assert_eq!(info.checksums, Some(checksums()));
        assert!(backend.stat(Path::new("folder")).await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_stat_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        let backend = backend(&server).await;
        let err = backend.stat(Path::new("missing.tar.gz")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert!(!backend.exists(Path::new("missing.tar.gz")).await.unwrap());
    }

    #[tokio::test]
    async fn test_properties() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifactory/api/storage/repo/ns-name-1.0.0.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": {"namespace": ["ns"], "name": ["name"]},
                "uri": "http://example/artifactory/api/storage/repo/ns-name-1.0.0.tar.gz"
            })))
            .mount(&server)
            .await;
        let properties = backend(&server).await.properties(Path::new("ns-name-1.0.0.tar.gz")).await.unwrap();
        assert_eq!(properties.first("namespace"), Some("ns"));
        assert_eq!(properties.first("name"), Some("name"));
    }

    #[tokio::test]
    async fn test_deploy_sends_checksums_matrix_and_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/artifactory/repo/ns-name-1\.0\.0\.tar\.gz;.*namespace=ns"))
            .and(header("X-Checksum-Sha256", "s256"))
            .and(header("X-Checksum-Md5", "m"))
            .and(header(API_KEY_HEADER, "secret"))
            .and(body_bytes(b"archive".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        let handle = backend(&server).await.authorize(Some(&Credential::ApiKey("secret".to_string())));
        let properties: Properties = [("namespace", "ns")].into_iter().collect();
        handle.deploy(Path::new("ns-name-1.0.0.tar.gz"), b"archive".into(), &checksums(), Some(&properties)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deploy_rejected_properties() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(414)).mount(&server).await;
        let properties: Properties = [("namespace", "ns")].into_iter().collect();
        let err = backend(&server)
            .await
            .deploy(Path::new("a.tar.gz"), b"x".into(), &checksums(), Some(&properties))
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::PropertiesRejected(_)));
    }

    #[tokio::test]
    async fn test_deploy_relays_store_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(409).set_body_string("checksum conflict"))
            .mount(&server)
            .await;
        let err = backend(&server).await.deploy(Path::new("a.tar.gz"), b"x".into(), &checksums(), None).await.unwrap_err();
        match &*err {
            ErrorKind::Http { status, body } => {
                assert_eq!(*status, 409);
                assert_eq!(body, "checksum conflict");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_set_properties_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/artifactory/api/storage/repo/a.tar.gz"))
            .and(query_param("recursive", "0"))
            .and(header("Authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let handle = backend(&server).await.authorize(Some(&Credential::AccessToken("token".to_string())));
        let properties: Properties = [("fqcn", "ns.name")].into_iter().collect();
        handle.set_properties(Path::new("a.tar.gz"), &properties).await.unwrap();
    }

    #[tokio::test]
    async fn test_prefix_is_part_of_the_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifactory/repo/published/a.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"blob".to_vec()))
            .mount(&server)
            .await;
        let backend =
            ArtifactoryBackend::new("art", &format!("{}/artifactory", server.uri()), "repo", Some("published")).unwrap();
        assert_eq!(backend.read(Path::new("a.tar.gz")).await.unwrap(), b"blob");
    }

    #[tokio::test]
    async fn test_reader_streams_blob() {
        use tokio::io::AsyncReadExt;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifactory/repo/a.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 70_000]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/artifactory/repo/missing.tar.gz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let backend = backend(&server).await;
        let mut reader = backend.reader(Path::new("a.tar.gz")).await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, vec![7u8; 70_000]);
        let err = backend.reader(Path::new("missing.tar.gz")).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
