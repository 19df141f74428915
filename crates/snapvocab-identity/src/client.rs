//! Identity client bound to one storage adapter.
//!
//! The client keeps the active session in memory, falls back to the session
//! persisted in its storage adapter, refreshes sessions close to expiry and
//! validates them against the auth service.

use reqwest::Url;
use tracing::{debug, warn};

use crate::backend::{AuthBackend, GoTrueBackend};
use crate::error::{BackendError, IdentityError, Result};
use crate::session::{Credential, Session, User};
use crate::storage::{CookieStorage, MemoryCookieJar, StorageAdapter, StorageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Refresh sessions that are expired or about to expire
    pub auto_refresh_token: bool,
    /// Write sessions through the storage adapter
    pub persist_session: bool,
    /// Accept sessions delivered in a redirect URL fragment
    pub detect_session_in_url: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
            detect_session_in_url: true,
        }
    }
}

pub struct IdentityClient<B = GoTrueBackend> {
    backend: B,
    storage: Box<dyn StorageAdapter>,
    custom_storage: bool,
    storage_key: String,
    options: ClientOptions,
    session: Option<Session>,
}

impl<B: AuthBackend> IdentityClient<B> {
    /// Create a client. Without a custom adapter the session lives in the
    /// client's own cookie jar.
    pub fn new(
        backend: B,
        storage_key: impl Into<String>,
        options: ClientOptions,
        storage: Option<Box<dyn StorageAdapter>>,
    ) -> Self {
        let custom_storage = storage.is_some();
        let storage: Box<dyn StorageAdapter> = match storage {
            Some(storage) => storage,
            None => Box::new(CookieStorage::new(MemoryCookieJar::new())),
        };

        Self {
            backend,
            storage,
            custom_storage,
            storage_key: storage_key.into(),
            options,
            session: None,
        }
    }

    pub fn options(&self) -> ClientOptions {
        self.options
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.storage.kind()
    }

    pub fn has_custom_storage(&self) -> bool {
        self.custom_storage
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// The in-memory session, without touching storage or the network
    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Whether the storage adapter holds a session
    pub fn has_stored_session(&self) -> bool {
        matches!(self.storage.get(&self.storage_key), Ok(Some(_)))
    }

    /// Install an explicit credential as the active session.
    ///
    /// The access token is validated with the auth service first. If it is
    /// rejected and a refresh token was supplied, the refresh token is
    /// exchanged instead. A session that cannot be written to storage is
    /// still installed in memory.
    pub async fn set_session(&mut self, credential: &Credential) -> Result<Session> {
        let session = match self.backend.get_user(credential.access_token()).await {
            Ok(user) => Session::from_credential(credential, user),
            Err(BackendError::Unauthorized) if self.options.auto_refresh_token => {
                match credential.refresh_token() {
                    Some(refresh_token) => {
                        debug!("Supplied access token rejected, exchanging refresh token");
                        self.backend.refresh_session(refresh_token).await?
                    }
                    None => return Err(IdentityError::Unauthorized),
                }
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.persist(&session) {
            warn!(error = %e, "Failed to persist session, keeping it in memory");
        }
        self.session = Some(session.clone());
        Ok(session)
    }

    /// The active session, loaded from storage if needed and refreshed when
    /// close to expiry.
    pub async fn get_session(&mut self) -> Result<Option<Session>> {
        if self.session.is_none() {
            self.session = self.load_stored();
        }
        let Some(session) = self.session.clone() else {
            return Ok(None);
        };

        if !session.needs_refresh() {
            return Ok(Some(session));
        }

        if self.options.auto_refresh_token && session.has_refresh_token() {
            match self.backend.refresh_session(&session.refresh_token).await {
                Ok(refreshed) => {
                    if let Err(e) = self.persist(&refreshed) {
                        warn!(error = %e, "Failed to persist refreshed session");
                    }
                    self.session = Some(refreshed.clone());
                    return Ok(Some(refreshed));
                }
                Err(BackendError::Unauthorized) => {
                    debug!("Refresh token rejected, discarding session");
                    self.discard_local();
                    return Ok(None);
                }
                Err(e) if !session.is_expired() => {
                    warn!(error = %e, "Refresh failed, using session until it expires");
                    return Ok(Some(session));
                }
                Err(e) => return Err(e.into()),
            }
        }

        if session.is_expired() {
            debug!("Session expired and cannot be refreshed");
            self.session = None;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Validate the active session with the auth service.
    pub async fn get_user(&mut self) -> Result<User> {
        let session = self.get_session().await?.ok_or(IdentityError::Unauthorized)?;
        let user = self.backend.get_user(&session.access_token).await?;

        if let Some(ref mut active) = self.session {
            active.user = Some(user.clone());
        }
        Ok(user)
    }

    /// Pick up a session delivered in a redirect URL fragment
    /// (`#access_token=...&refresh_token=...`).
    pub async fn session_from_url(&mut self, url: &str) -> Result<Option<Session>> {
        if !self.options.detect_session_in_url {
            return Ok(None);
        }
        let Some(credential) = credential_from_url(url) else {
            return Ok(None);
        };

        self.set_session(&credential).await.map(Some)
    }

    /// Forget the session locally, then revoke it with the auth service.
    /// Revocation is best effort.
    pub async fn sign_out(&mut self) -> Result<()> {
        let session = self.session.take().or_else(|| self.load_stored());
        self.storage.remove(&self.storage_key)?;

        if let Some(session) = session {
            if let Err(e) = self.backend.sign_out(&session.access_token).await {
                warn!(error = %e, "Failed to revoke session");
            }
        }
        Ok(())
    }

    fn load_stored(&self) -> Option<Session> {
        let raw = match self.storage.get(&self.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored session");
                if let Err(e) = self.storage.remove(&self.storage_key) {
                    warn!(error = %e, "Failed to remove unreadable session");
                }
                None
            }
        }
    }

    fn persist(&self, session: &Session) -> Result<()> {
        if !self.options.persist_session {
            return Ok(());
        }
        let json = serde_json::to_string(session).map_err(crate::error::StorageError::from)?;
        self.storage.set(&self.storage_key, &json)?;
        Ok(())
    }

    fn discard_local(&mut self) {
        self.session = None;
        if let Err(e) = self.storage.remove(&self.storage_key) {
            warn!(error = %e, "Failed to remove stored session");
        }
    }
}

fn credential_from_url(url: &str) -> Option<Credential> {
    let url = Url::parse(url).ok()?;
    let fragment = url.fragment()?;

    let mut access_token = None;
    let mut refresh_token = None;
    for pair in fragment.split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(value).ok()?.into_owned();
        match name {
            "access_token" => access_token = Some(value),
            "refresh_token" => refresh_token = Some(value),
            "error" | "error_description" => {
                debug!(param = name, "Redirect carried an auth error");
                return None;
            }
            _ => {}
        }
    }

    access_token
        .filter(|t| !t.is_empty())
        .map(|access_token| Credential::new(access_token, refresh_token))
}
