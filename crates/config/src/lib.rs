//! depot configuration.
//!
//! Values are layered with `figment`, later sources overriding earlier ones:
//!
//! 1. built-in defaults;
//! 2. `/etc/depot/config.{toml,yaml,json}`;
//! 3. the same file names in the user's configuration directory;
//! 4. an explicitly requested file (`--config`);
//! 5. `DEPOT_`-prefixed environment variables, `__` separating nested keys
//!    (`DEPOT_UPSTREAM__URL`, `DEPOT_CACHE__MINUTES`);
//! 6. command-line overrides.
//!
//! The merged result is validated once and then shared read-only.

pub mod error;
mod load;

pub use crate::load::{Overrides, default_locations};
use crate::error::{ErrorKind, Result};
use depot_archive::UploadFormat;
use depot_cache::{CachePolicy, ExpiryMode};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: Listen,
    /// Host (and port) clients reach the gateway at. Taken from the request's
    /// `Host` header when unset.
    pub server_name: Option<String>,
    /// Scheme used for absolute URLs in responses.
    pub url_scheme: String,
    pub storage: Storage,
    pub auth: Auth,
    pub upstream: Upstream,
    pub cache: Cache,
    /// Transport encoding of uploaded archives.
    pub upload_format: UploadFormat,
    /// Largest request body accepted, in MiB. Uploads are spooled, so this
    /// bounds disk use rather than memory.
    pub max_upload_mb: u64,
    /// Always set properties separately after deploying.
    pub property_fallback: bool,
    /// Trust archive file names to skip non-matching archives early.
    pub fast_detection: bool,
    pub log: Log,
    pub health: Health,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: Listen::default(),
            server_name: None,
            url_scheme: "http".to_string(),
            storage: Storage::default(),
            auth: Auth::default(),
            upstream: Upstream::default(),
            cache: Cache::default(),
            upload_format: UploadFormat::default(),
            max_upload_mb: 1024,
            property_fallback: false,
            fast_detection: true,
            log: Log::default(),
            health: Health::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Listen {
    pub addr: IpAddr,
    pub port: u16,
}

impl Default for Listen {
    fn default() -> Self {
        Self { addr: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 5555 }
    }
}

impl Listen {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// Where collections (and cached upstream responses) are stored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// A directory on the local filesystem.
    Local { root: PathBuf },
    /// A repository on an Artifactory-compatible server.
    Artifactory {
        url: String,
        repository: String,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        access_token: Option<String>,
    },
}

impl Default for Storage {
    fn default() -> Self {
        Self::Local { root: load::default_storage_root() }
    }
}

/// How requests to the content store are authorized.
///
/// The configured credential comes from the storage section. An access
/// token takes precedence over an API key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Pass the client's own `Authorization` token on to the store.
    pub use_galaxy_auth: bool,
    /// Use the configured credential instead of the client's when both
    /// exist.
    pub prefer_configured_auth: bool,
    /// Never use the configured credential for publishing.
    pub publish_skip_configured_auth: bool,
    /// How the client's token is presented to the store.
    pub galaxy_auth_type: GalaxyAuthType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GalaxyAuthType {
    #[default]
    AccessToken,
    ApiKey,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Upstream {
    /// Registry to federate reads with. No federation when unset.
    pub url: Option<String>,
    /// Namespaces never looked up upstream.
    pub no_proxy_namespaces: Vec<String>,
    /// Hosts besides the upstream's own that download links may point at.
    pub download_hosts: Vec<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            url: None,
            no_proxy_namespaces: Vec::new(),
            download_hosts: Vec::new(),
            page_size: 100,
            timeout_secs: 60,
        }
    }
}

impl Upstream {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Cache {
    pub minutes: u32,
    pub read: bool,
    pub write: bool,
    pub expiry: ExpiryMode,
}

impl Default for Cache {
    fn default() -> Self {
        Self { minutes: 60, read: true, write: true, expiry: ExpiryMode::default() }
    }
}

impl Cache {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            read: self.read,
            write: self.write,
            expiry: self.expiry,
            ..CachePolicy::default()
        }
        .with_minutes(i64::from(self.minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Log {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Also write logs to this file.
    pub file: Option<PathBuf>,
    /// Log request and response headers.
    pub headers: bool,
    /// Log request and response bodies.
    pub body: bool,
}

impl Default for Log {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None, headers: false, body: false }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Health {
    /// Returned verbatim by the basic health check.
    pub custom_text: Option<String>,
}

fn validate_url(key: &'static str, value: &str) -> Result<()> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => exn::bail!(ErrorKind::invalid(key, format!("unsupported scheme '{}'", url.scheme()))),
        Err(e) => exn::bail!(ErrorKind::invalid(key, e.to_string())),
    }
}

impl Config {
    /// Reject values that deserialize fine but can't work.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.url_scheme.as_str(), "http" | "https") {
            exn::bail!(ErrorKind::invalid("url_scheme", format!("expected http or https, got '{}'", self.url_scheme)));
        }
        if let Some(url) = &self.upstream.url {
            validate_url("upstream.url", url)?;
        }
        if self.max_upload_mb == 0 {
            exn::bail!(ErrorKind::invalid("max_upload_mb", "must be at least 1"));
        }
        if self.upstream.page_size == 0 {
            exn::bail!(ErrorKind::invalid("upstream.page_size", "must be at least 1"));
        }
        if self.upstream.timeout_secs == 0 {
            exn::bail!(ErrorKind::invalid("upstream.timeout_secs", "must be at least 1"));
        }
        match &self.storage {
            Storage::Local { root } if root.as_os_str().is_empty() => {
                exn::bail!(ErrorKind::invalid("storage.root", "must not be empty"));
            },
            Storage::Artifactory { url, repository, .. } => {
                validate_url("storage.url", url)?;
                if repository.trim_matches('/').is_empty() {
                    exn::bail!(ErrorKind::invalid("storage.repository", "must not be empty"));
                }
            },
            Storage::Local { .. } => {},
        }
        Ok(())
    }

    /// [`max_upload_mb`](Self::max_upload_mb) in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        usize::try_from(self.max_upload_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    /// Whether reads are federated with an upstream registry.
    pub fn federates(&self) -> bool {
        self.upstream.url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(!config.federates());
        assert_eq!(config.listen.socket_addr().to_string(), "127.0.0.1:5555");
        assert_eq!(config.cache.policy(), CachePolicy::default());
        assert_eq!(config.max_upload_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_cache_policy() {
        let cache = Cache { minutes: 5, read: false, write: true, expiry: ExpiryMode::OnRead };
        let policy = cache.policy();
        assert_eq!(policy.ttl, time::Duration::minutes(5));
        assert!(!policy.read);
        assert_eq!(policy.expiry, ExpiryMode::OnRead);
    }

    #[rstest]
    #[case::ftp_upstream(Config { upstream: Upstream { url: Some("ftp://x".into()), ..Upstream::default() }, ..Config::default() }, "upstream.url")]
    #[case::relative_upstream(Config { upstream: Upstream { url: Some("/api".into()), ..Upstream::default() }, ..Config::default() }, "upstream.url")]
    #[case::zero_page_size(Config { upstream: Upstream { page_size: 0, ..Upstream::default() }, ..Config::default() }, "upstream.page_size")]
    #[case::empty_root(Config { storage: Storage::Local { root: PathBuf::new() }, ..Config::default() }, "storage.root")]
    #[case::scheme(Config { url_scheme: "gopher".into(), ..Config::default() }, "url_scheme")]
    #[case::zero_upload_limit(Config { max_upload_mb: 0, ..Config::default() }, "max_upload_mb")]
    fn test_invalid(#[case] config: Config, #[case] expected: &str) {
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { key, .. } if *key == expected));
    }
}
