//! Which credential a request uses against the content store.
//!
//! The configured credential is an access token or, failing that, an API key
//! from the storage section. With `use_galaxy_auth`, the token a client sends
//! in its `Authorization` header is used instead, unless
//! `prefer_configured_auth` is set and a configured credential exists.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use depot_config::{Config, GalaxyAuthType, Storage};
use depot_storage::Credential;

/// The credential from configuration, if any.
pub fn configured(storage: &Storage) -> Option<Credential> {
    match storage {
        Storage::Artifactory { access_token: Some(token), .. } => Some(Credential::AccessToken(token.clone())),
        Storage::Artifactory { api_key: Some(key), .. } => Some(Credential::ApiKey(key.clone())),
        _ => None,
    }
}

/// The token part of an `Authorization` header (`Bearer <token>`,
/// `Token <token>`).
fn client_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value.split(' ').nth(1).filter(|token| !token.is_empty())
}

/// Resolve the credential for one request. `skip_configured` ignores the
/// configured credential (used for publishing when so configured).
pub fn resolve(config: &Config, headers: &HeaderMap, skip_configured: bool) -> Option<Credential> {
    let configured = if skip_configured { None } else { configured(&config.storage) };
    let auth = &config.auth;
    if !auth.use_galaxy_auth || (auth.prefer_configured_auth && configured.is_some()) {
        return configured;
    }
    match client_token(headers) {
        Some(token) => Some(match auth.galaxy_auth_type {
            GalaxyAuthType::AccessToken => Credential::AccessToken(token.to_string()),
            GalaxyAuthType::ApiKey => Credential::ApiKey(token.to_string()),
        }),
        None => configured,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use depot_config::Auth;
    use rstest::rstest;

    fn config(access_token: Option<&str>, api_key: Option<&str>, auth: Auth) -> Config {
        Config {
            storage: Storage::Artifactory {
                url: "https://artifactory.example/artifactory/".to_string(),
                repository: "galaxy".to_string(),
                prefix: None,
                api_key: api_key.map(str::to_string),
                access_token: access_token.map(str::to_string),
            },
            auth,
            ..Config::default()
        }
    }

    fn with_client_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
        headers
    }

    fn galaxy_auth(prefer_configured_auth: bool) -> Auth {
        Auth { use_galaxy_auth: true, prefer_configured_auth, ..Auth::default() }
    }

    #[test]
    fn test_access_token_beats_api_key() {
        let config = config(Some("token"), Some("key"), Auth::default());
        assert_eq!(resolve(&config, &HeaderMap::new(), false), Some(Credential::AccessToken("token".into())));
        let config = self::config(None, Some("key"), Auth::default());
        assert_eq!(resolve(&config, &HeaderMap::new(), false), Some(Credential::ApiKey("key".into())));
    }

    #[test]
    fn test_client_token_ignored_without_galaxy_auth() {
        let config = config(None, None, Auth::default());
        assert_eq!(resolve(&config, &with_client_token("client"), false), None);
    }

    #[rstest]
    #[case::client_wins(Some("token"), false, Some(Credential::AccessToken("client".into())))]
    #[case::configured_preferred(Some("token"), true, Some(Credential::AccessToken("token".into())))]
    #[case::nothing_configured(None, true, Some(Credential::AccessToken("client".into())))]
    fn test_galaxy_auth(
        #[case] access_token: Option<&str>,
        #[case] prefer_configured_auth: bool,
        #[case] expected: Option<Credential>,
    ) {
        let config = config(access_token, None, galaxy_auth(prefer_configured_auth));
        assert_eq!(resolve(&config, &with_client_token("client"), false), expected);
    }

    #[test]
    fn test_galaxy_auth_as_api_key() {
        let auth = Auth { galaxy_auth_type: GalaxyAuthType::ApiKey, ..galaxy_auth(false) };
        let config = config(None, None, auth);
        assert_eq!(resolve(&config, &with_client_token("client"), false), Some(Credential::ApiKey("client".into())));
    }

    #[test]
    fn test_publish_can_skip_configured_credential() {
        let config = config(Some("token"), None, Auth::default());
        assert_eq!(resolve(&config, &HeaderMap::new(), true), None);
        let config = self::config(Some("token"), None, galaxy_auth(true));
        assert_eq!(resolve(&config, &with_client_token("client"), true), Some(Credential::AccessToken("client".into())));
    }
}
