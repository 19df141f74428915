//! Backend configuration.
//!
//! The service endpoint URL and public API key are required. They are read
//! once at startup; a missing or malformed value is a fatal misconfiguration
//! and is reported before any client is constructed.
//!
//! Environment variables:
//! - `SNAPVOCAB_BACKEND_URL` (required)
//! - `SNAPVOCAB_BACKEND_ANON_KEY` (required)
//! - `SNAPVOCAB_COOKIE_SECURE` (optional, default `true`)
//! - `SNAPVOCAB_KEYCHAIN_SERVICE` (optional, default `snapvocab`)

use std::fmt;

use reqwest::Url;

use crate::error::ConfigError;

pub const ENV_BACKEND_URL: &str = "SNAPVOCAB_BACKEND_URL";
pub const ENV_BACKEND_ANON_KEY: &str = "SNAPVOCAB_BACKEND_ANON_KEY";
pub const ENV_COOKIE_SECURE: &str = "SNAPVOCAB_COOKIE_SECURE";
pub const ENV_KEYCHAIN_SERVICE: &str = "SNAPVOCAB_KEYCHAIN_SERVICE";

/// Keychain service name used when none is configured
const DEFAULT_KEYCHAIN_SERVICE: &str = "snapvocab";

#[derive(Clone)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: String,
    /// Whether session cookies carry the `Secure` attribute.
    pub cookie_secure: bool,
    pub keychain_service: String,
}

impl BackendConfig {
    pub fn new(url: &str, anon_key: &str) -> Result<Self, ConfigError> {
        if url.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_BACKEND_URL));
        }
        if anon_key.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_BACKEND_ANON_KEY));
        }
        let url = Url::parse(url.trim()).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!("{} has no host", url)));
        }

        Ok(Self {
            url,
            anon_key: anon_key.trim().to_string(),
            cookie_secure: true,
            keychain_service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
        })
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_BACKEND_URL).ok_or(ConfigError::Missing(ENV_BACKEND_URL))?;
        let anon_key =
            lookup(ENV_BACKEND_ANON_KEY).ok_or(ConfigError::Missing(ENV_BACKEND_ANON_KEY))?;
        let mut config = Self::new(&url, &anon_key)?;

        if let Some(value) = lookup(ENV_COOKIE_SECURE) {
            config.cookie_secure = parse_bool(&value).ok_or(ConfigError::InvalidValue {
                name: ENV_COOKIE_SECURE,
                value,
            })?;
        }
        if let Some(service) = lookup(ENV_KEYCHAIN_SERVICE).filter(|s| !s.trim().is_empty()) {
            config.keychain_service = service.trim().to_string();
        }

        Ok(config)
    }

    /// Project reference: the first DNS label of the backend host
    pub fn project_ref(&self) -> &str {
        self.url
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or_default()
    }

    /// Storage key under which the session is persisted
    pub fn storage_key(&self) -> String {
        format!("sb-{}-auth-token", self.project_ref())
    }

    /// Resolve a path under the auth API, e.g. `auth_url("user")`
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url.as_str().trim_end_matches('/'), path)
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("cookie_secure", &self.cookie_secure)
            .field("keychain_service", &self.keychain_service)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
