use crate::auth;
use crate::error::{ErrorKind, Result};
use axum::http::HeaderMap;
use axum::http::header::HOST;
use depot_config::{Config, Storage};
use depot_library::{Context, Federation, Options};
use depot_storage::BackendHandle;
use depot_storage::backend::{ArtifactoryBackend, LocalBackend};
use depot_upstream::UpstreamClient;
use exn::ResultExt;
use std::sync::Arc;
use url::Url;

/// Shared by every request; never mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Library context with the unauthorized store handle.
    pub library: Context,
}

fn open_storage(storage: &Storage) -> Result<BackendHandle> {
    let backend: BackendHandle = match storage {
        Storage::Local { root } => {
            let root = std::path::absolute(root).or_raise(|| ErrorKind::Storage)?;
            Arc::new(LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?)
        },
        Storage::Artifactory { url, repository, prefix, .. } => Arc::new(
            ArtifactoryBackend::new("artifactory", url, repository.as_str(), prefix.as_deref())
                .or_raise(|| ErrorKind::Storage)?,
        ),
    };
    tracing::info!(backend = backend.name(), "Opened content store");
    Ok(backend)
}

impl AppState {
    /// State over an already opened store.
    pub fn new(config: Config, backend: BackendHandle) -> Result<Self> {
        let options = Options {
            fast_detection: config.fast_detection,
            property_fallback: config.property_fallback,
            upload_format: config.upload_format,
        };
        let mut library = Context::new(backend).with_options(options);
        if let Some(url) = &config.upstream.url {
            let upstream = UpstreamClient::new(url, config.upstream.page_size, config.upstream.timeout())
                .or_raise(|| ErrorKind::Upstream)?
                .with_download_hosts(&config.upstream.download_hosts);
            let federation = Federation::new(upstream, config.cache.policy())
                .without_namespaces(config.upstream.no_proxy_namespaces.iter().cloned());
            tracing::info!(upstream = %url, cache = ?config.cache, "Federating reads");
            library = library.with_federation(federation);
        }
        Ok(Self { config: Arc::new(config), library })
    }

    /// Open the configured store and build state over it.
    pub fn from_config(config: Config) -> Result<Self> {
        let backend = open_storage(&config.storage)?;
        Self::new(config, backend)
    }

    /// Library context authorized for a request.
    pub fn context(&self, headers: &HeaderMap, publishing: bool) -> Context {
        let skip_configured = publishing && self.config.auth.publish_skip_configured_auth;
        let credential = auth::resolve(&self.config, headers, skip_configured);
        self.library.with_backend(self.library.backend.authorize(credential.as_ref()))
    }

    /// The origin clients reached the gateway at, ending with `/`.
    pub fn root(&self, headers: &HeaderMap) -> Option<Url> {
        let host = match &self.config.server_name {
            Some(name) => name.clone(),
            None => match headers.get(HOST).and_then(|value| value.to_str().ok()) {
                Some(host) => host.to_string(),
                None => self.config.listen.socket_addr().to_string(),
            },
        };
        Url::parse(&format!("{}://{host}/", self.config.url_scheme)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use depot_storage::backend::MockBackend;

    #[test]
    fn test_root() {
        let state = AppState::new(Config::default(), Arc::new(MockBackend::default())).unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(state.root(&headers).unwrap().as_str(), "http://127.0.0.1:5555/");
        headers.insert(HOST, HeaderValue::from_static("galaxy.example:8080"));
        assert_eq!(state.root(&headers).unwrap().as_str(), "http://galaxy.example:8080/");
        headers.insert(HOST, HeaderValue::from_static("bad host/"));
        assert!(state.root(&headers).is_none());

        let config = Config { server_name: Some("public.example".into()), url_scheme: "https".into(), ..Config::default() };
        let state = AppState::new(config, Arc::new(MockBackend::default())).unwrap();
        assert_eq!(state.root(&headers).unwrap().as_str(), "https://public.example/");
    }

    #[test]
    fn test_federation_from_config() {
        let mut config = Config::default();
        config.upstream.url = Some("https://galaxy.example/".into());
        config.upstream.no_proxy_namespaces = vec!["internal".into()];
        let state = AppState::new(config, Arc::new(MockBackend::default())).unwrap();
        assert!(state.library.federation_for("community").is_some());
        assert!(state.library.federation_for("internal").is_none());
    }
}
