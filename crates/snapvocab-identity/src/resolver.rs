//! Per-request identity resolution on the server.
//!
//! Every request gets a fresh client wired to that request's cookies. The
//! credential sources are then tried in an explicit precedence order (by
//! default the bearer header, then the cookie session) until one yields a
//! credential, and the resulting session is checked with the auth service.
//!
//! Per request the resolver moves through
//! `Unresolved -> CookieClientBuilt -> {BearerInjected | CookieOnly} ->
//! Resolved(user) | Resolved(null)` exactly once. Nothing is shared between
//! invocations.

use std::fmt;

use reqwest::header::{HeaderMap, AUTHORIZATION};
use tracing::{debug, warn};

use crate::backend::AuthBackend;
use crate::client::{ClientOptions, IdentityClient};
use crate::config::BackendConfig;
use crate::error::{IdentityError, StorageError};
use crate::session::{Credential, User};
use crate::storage::{CookieEntry, CookieJar, CookieOptions, CookieStorage};

/// Scheme marker of the `Authorization` header. Case sensitive, one space.
pub const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `Authorization: Bearer <token>` sent by the native app
    BearerHeader,
    /// Session cookies managed by the browser
    CookieSession,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::BearerHeader => write!(f, "bearer-header"),
            CredentialSource::CookieSession => write!(f, "cookie-session"),
        }
    }
}

pub const DEFAULT_PRECEDENCE: [CredentialSource; 2] =
    [CredentialSource::BearerHeader, CredentialSource::CookieSession];

/// What happens when a bearer credential is present but cannot be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidBearerPolicy {
    /// Keep trying later sources, i.e. an existing cookie session
    #[default]
    FallThrough,
    /// End resolution with the injection error
    Reject,
}

/// Extract the explicit credential from `Authorization`.
///
/// `Ok(None)` when the header is absent; `MalformedCredential` when it is
/// present but not bearer-shaped.
pub fn bearer_credential(headers: &HeaderMap) -> Result<Option<Credential>, IdentityError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| IdentityError::MalformedCredential("non-ASCII header value".into()))?;

    match value.strip_prefix(BEARER_PREFIX) {
        Some("") => Err(IdentityError::MalformedCredential("empty bearer token".into())),
        Some(token) => Ok(Some(Credential::new(token, None))),
        None => Err(IdentityError::MalformedCredential("unsupported scheme".into())),
    }
}

/// Cookie jar whose write failures are logged and dropped.
///
/// Once response headers are committed rotated cookies cannot be sent, but the
/// request can still finish with its in-memory session.
struct WriteBackJar<J>(J);

impl<J: CookieJar> CookieJar for WriteBackJar<J> {
    fn get_all(&self) -> Vec<(String, String)> {
        self.0.get_all()
    }

    fn set_all(&self, entries: &[CookieEntry]) -> Result<(), StorageError> {
        if let Err(e) = self.0.set_all(entries) {
            warn!(error = %e, cookies = entries.len(), "Cookie write-back failed, continuing");
        }
        Ok(())
    }
}

/// Result of resolving one request.
pub struct Resolution<B> {
    pub client: IdentityClient<B>,
    pub user: Option<User>,
    pub error: Option<IdentityError>,
    source: Option<CredentialSource>,
}

impl<B> Resolution<B> {
    /// The source whose credential was checked, if any yielded one
    pub fn source(&self) -> Option<CredentialSource> {
        self.source
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn into_parts(self) -> (IdentityClient<B>, Option<User>, Option<IdentityError>) {
        (self.client, self.user, self.error)
    }
}

pub struct RequestIdentityResolver<B> {
    config: BackendConfig,
    backend: B,
    precedence: Vec<CredentialSource>,
    invalid_bearer: InvalidBearerPolicy,
}

impl<B: AuthBackend + Clone> RequestIdentityResolver<B> {
    pub fn new(config: BackendConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            precedence: DEFAULT_PRECEDENCE.to_vec(),
            invalid_bearer: InvalidBearerPolicy::default(),
        }
    }

    pub fn with_precedence(mut self, precedence: Vec<CredentialSource>) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_invalid_bearer_policy(mut self, policy: InvalidBearerPolicy) -> Self {
        self.invalid_bearer = policy;
        self
    }

    pub fn precedence(&self) -> &[CredentialSource] {
        &self.precedence
    }

    /// Client wired to the request's cookies, read and write
    fn cookie_client<J>(&self, cookies: J) -> IdentityClient<B>
    where
        J: CookieJar + 'static,
    {
        let options = CookieOptions {
            secure: self.config.cookie_secure,
            ..CookieOptions::default()
        };
        let storage = CookieStorage::with_options(WriteBackJar(cookies), options);

        IdentityClient::new(
            self.backend.clone(),
            self.config.storage_key(),
            ClientOptions {
                detect_session_in_url: false,
                ..ClientOptions::default()
            },
            Some(Box::new(storage)),
        )
    }

    /// Resolve the caller of one request. Never fails: errors are returned in
    /// the [`Resolution`].
    pub async fn resolve<J>(&self, headers: &HeaderMap, cookies: J) -> Resolution<B>
    where
        J: CookieJar + 'static,
    {
        let mut client = self.cookie_client(cookies);
        let mut source = None;
        let mut deferred: Option<IdentityError> = None;

        for &candidate in &self.precedence {
            match candidate {
                CredentialSource::BearerHeader => {
                    let credential = match bearer_credential(headers) {
                        Ok(Some(credential)) => credential,
                        Ok(None) => continue,
                        Err(e) => {
                            debug!(error = %e, "Ignoring Authorization header");
                            continue;
                        }
                    };

                    match client.set_session(&credential).await {
                        Ok(_) => {
                            debug!("Bearer credential injected");
                            source = Some(candidate);
                            break;
                        }
                        Err(e) if self.invalid_bearer == InvalidBearerPolicy::Reject => {
                            debug!(error = %e, "Bearer credential rejected");
                            return Resolution {
                                client,
                                user: None,
                                error: Some(e),
                                source: Some(candidate),
                            };
                        }
                        Err(e) => {
                            debug!(error = %e, "Bearer credential rejected, trying next source");
                            deferred = Some(e);
                        }
                    }
                }
                CredentialSource::CookieSession => {
                    if client.has_stored_session() {
                        debug!("Using cookie session");
                        source = Some(candidate);
                        break;
                    }
                }
            }
        }

        let (user, error) = if source.is_some() {
            match client.get_user().await {
                Ok(user) => (Some(user), None),
                Err(e) => (None, Some(e)),
            }
        } else {
            let error = deferred
                .filter(|e| !e.is_unauthorized())
                .unwrap_or(IdentityError::Unauthorized);
            (None, Some(error))
        };

        match (&user, &error) {
            (Some(user), _) => debug!(user_id = %user.id, source = ?source, "Request identity resolved"),
            (None, Some(e)) => debug!(error = %e, source = ?source, "Request unauthenticated"),
            (None, None) => {}
        }

        Resolution {
            client,
            user,
            error,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CookieStorage, RequestCookies, StorageAdapter};
    use crate::test_support::{session_json, FakeBackend};
    use chrono::Utc;
    use reqwest::header::{HeaderValue, COOKIE};

    fn config() -> BackendConfig {
        BackendConfig::new("https://test.supabase.co", "anon").unwrap()
    }

    fn key() -> String {
        config().storage_key()
    }

    fn headers(authorization: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = authorization {
            headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        }
        headers
    }

    /// Request cookies already holding a session for `access_token`
    fn cookies_with_session(access_token: &str, refresh_token: &str, expires_at: Option<i64>) -> RequestCookies {
        let seed = RequestCookies::default();
        CookieStorage::new(seed.clone())
            .set(&key(), &session_json(access_token, refresh_token, expires_at))
            .unwrap();

        let mut request = HeaderMap::new();
        let cookie_header = seed
            .get_all()
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        request.insert(COOKIE, HeaderValue::from_str(&cookie_header).unwrap());
        RequestCookies::from_headers(&request)
    }

    #[test]
    fn test_bearer_parsing() {
        assert!(bearer_credential(&headers(None)).unwrap().is_none());

        let credential = bearer_credential(&headers(Some("Bearer abc123"))).unwrap().unwrap();
        assert_eq!(credential.access_token(), "abc123");
        assert_eq!(credential.refresh_token(), None);

        for malformed in ["Basic xyz", "bearer abc", "Bearerabc", "Bearer "] {
            assert!(matches!(
                bearer_credential(&headers(Some(malformed))),
                Err(IdentityError::MalformedCredential(_))
            ));
        }
    }

    #[test]
    fn test_default_precedence() {
        let resolver = RequestIdentityResolver::new(config(), FakeBackend::new());
        assert_eq!(
            resolver.precedence(),
            &[CredentialSource::BearerHeader, CredentialSource::CookieSession]
        );
    }

    #[tokio::test]
    async fn test_bearer_without_cookies() {
        let backend = FakeBackend::new().with_user("abc123", "learner-1");
        let resolver = RequestIdentityResolver::new(config(), backend.clone());

        let resolution = resolver
            .resolve(&headers(Some("Bearer abc123")), RequestCookies::default())
            .await;
        assert_eq!(resolution.source(), Some(CredentialSource::BearerHeader));
        assert_eq!(backend.validated_tokens()[0], "abc123");

        let (_client, user, error) = resolution.into_parts();
        assert_eq!(user.unwrap().id, "learner-1");
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_bearer_without_cookies_is_unauthorized() {
        let backend = FakeBackend::new();
        let resolver = RequestIdentityResolver::new(config(), backend.clone());

        let (_, user, error) = resolver
            .resolve(&headers(Some("Bearer abc123")), RequestCookies::default())
            .await
            .into_parts();
        assert!(user.is_none());
        assert!(error.unwrap().is_unauthorized());
        assert_eq!(backend.validated_tokens(), vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_bearer_wins_over_cookie_session() {
        let backend = FakeBackend::new()
            .with_user("mobile-token", "mobile-user")
            .with_user("web-token", "web-user");
        let resolver = RequestIdentityResolver::new(config(), backend);

        let resolution = resolver
            .resolve(
                &headers(Some("Bearer mobile-token")),
                cookies_with_session("web-token", "", None),
            )
            .await;
        assert_eq!(resolution.user.unwrap().id, "mobile-user");
    }

    #[tokio::test]
    async fn test_cookie_session_without_header() {
        let backend = FakeBackend::new().with_user("web-token", "web-user");
        let resolver = RequestIdentityResolver::new(config(), backend.clone());

        let resolution = resolver
            .resolve(&headers(None), cookies_with_session("web-token", "", None))
            .await;
        assert_eq!(resolution.source(), Some(CredentialSource::CookieSession));
        assert_eq!(resolution.user.as_ref().unwrap().id, "web-user");
        assert!(resolution.error.is_none());
        // Only the identity check, never an injection
        assert_eq!(backend.validated_tokens(), vec!["web-token".to_string()]);
    }

    #[tokio::test]
    async fn test_wrong_scheme_falls_through_to_cookies() {
        let backend = FakeBackend::new().with_user("web-token", "web-user");
        let resolver = RequestIdentityResolver::new(config(), backend.clone());

        let resolution = resolver
            .resolve(&headers(Some("Basic xyz")), cookies_with_session("web-token", "", None))
            .await;
        assert_eq!(resolution.source(), Some(CredentialSource::CookieSession));
        assert_eq!(resolution.user.unwrap().id, "web-user");
        assert!(!backend.validated_tokens().contains(&"xyz".to_string()));
    }

    #[tokio::test]
    async fn test_nothing_resolves_to_unauthorized() {
        let resolver = RequestIdentityResolver::new(config(), FakeBackend::new());

        for authorization in [None, Some("Basic xyz")] {
            let resolution = resolver
                .resolve(&headers(authorization), RequestCookies::default())
                .await;
            assert!(resolution.source().is_none());
            assert!(!resolution.is_authenticated());
            assert!(resolution.error.unwrap().is_unauthorized());
        }
    }

    #[tokio::test]
    async fn test_invalid_bearer_falls_back_to_cookie_session() {
        let backend = FakeBackend::new().with_user("web-token", "web-user");
        let resolver = RequestIdentityResolver::new(config(), backend);

        let resolution = resolver
            .resolve(
                &headers(Some("Bearer expired")),
                cookies_with_session("web-token", "", None),
            )
            .await;
        assert_eq!(resolution.source(), Some(CredentialSource::CookieSession));
        assert_eq!(resolution.user.unwrap().id, "web-user");
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_invalid_bearer() {
        let backend = FakeBackend::new().with_user("web-token", "web-user");
        let resolver = RequestIdentityResolver::new(config(), backend)
            .with_invalid_bearer_policy(InvalidBearerPolicy::Reject);

        let resolution = resolver
            .resolve(
                &headers(Some("Bearer expired")),
                cookies_with_session("web-token", "", None),
            )
            .await;
        assert!(resolution.user.is_none());
        assert!(resolution.error.unwrap().is_unauthorized());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_surfaced() {
        let resolver =
            RequestIdentityResolver::new(config(), FakeBackend::new().with_server_error());

        let resolution = resolver
            .resolve(&headers(None), cookies_with_session("web-token", "", None))
            .await;
        assert!(matches!(resolution.error, Some(IdentityError::Upstream(_))));

        let resolution = resolver
            .resolve(&headers(Some("Bearer abc123")), RequestCookies::default())
            .await;
        assert!(matches!(resolution.error, Some(IdentityError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_cookie_only_precedence_ignores_header() {
        let backend = FakeBackend::new().with_user("abc123", "learner-1");
        let resolver = RequestIdentityResolver::new(config(), backend.clone())
            .with_precedence(vec![CredentialSource::CookieSession]);

        let resolution = resolver
            .resolve(&headers(Some("Bearer abc123")), RequestCookies::default())
            .await;
        assert!(resolution.error.unwrap().is_unauthorized());
        assert!(backend.validated_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_rotated_cookies_are_written_back() {
        let backend = FakeBackend::new().with_refresh("r-1", "fresh", "web-user");
        let resolver = RequestIdentityResolver::new(config(), backend);
        let cookies = cookies_with_session("stale", "r-1", Some(Utc::now().timestamp() - 1));

        let resolution = resolver.resolve(&headers(None), cookies.clone()).await;
        assert_eq!(resolution.user.unwrap().id, "web-user");

        let pending = cookies.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, key());
        assert!(pending[0].to_set_cookie().contains("fresh"));
    }

    #[tokio::test]
    async fn test_write_back_failure_does_not_change_outcome() {
        let backend = FakeBackend::new()
            .with_refresh("r-1", "fresh", "web-user")
            .with_user("abc123", "learner-1");
        let resolver = RequestIdentityResolver::new(config(), backend);

        for committed in [false, true] {
            let cookies = cookies_with_session("stale", "r-1", Some(Utc::now().timestamp() - 1));
            if committed {
                cookies.commit();
            }
            let resolution = resolver.resolve(&headers(None), cookies).await;
            assert_eq!(resolution.user.unwrap().id, "web-user");
            assert!(resolution.error.is_none());

            let cookies = RequestCookies::default();
            if committed {
                cookies.commit();
            }
            let resolution = resolver.resolve(&headers(Some("Bearer abc123")), cookies).await;
            assert_eq!(resolution.user.unwrap().id, "learner-1");
            assert!(resolution.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_same_header_resolves_same_principal_on_fresh_resolver() {
        let backend = FakeBackend::new().with_user("abc123", "learner-1");
        let request = headers(Some("Bearer abc123"));

        let first = RequestIdentityResolver::new(config(), backend.clone())
            .resolve(&request, RequestCookies::default())
            .await;
        let second = RequestIdentityResolver::new(config(), backend)
            .resolve(&request, RequestCookies::default())
            .await;

        assert_eq!(first.user.unwrap().id, second.user.unwrap().id);
    }
}
