use std::fmt;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Refresh this many seconds before the access token actually expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// An opaque bearer credential. Never logged: `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &format_args!("[REDACTED; {} bytes]", self.access_token.len()))
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// An authenticated principal as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Session state as persisted in storage and returned by the token endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Unix timestamp (seconds) at which the access token expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Build a session around an explicitly supplied credential
    pub fn from_credential(credential: &Credential, user: User) -> Self {
        Self {
            access_token: credential.access_token().to_string(),
            refresh_token: credential.refresh_token().unwrap_or_default().to_string(),
            token_type: default_token_type(),
            expires_in: None,
            expires_at: None,
            user: Some(user),
        }
    }

    /// Fill in `expires_at` from `expires_in` when the service only sent the latter
    pub fn with_computed_expiry(mut self) -> Self {
        if self.expires_at.is_none() {
            if let Some(expires_in) = self.expires_in {
                self.expires_at = Some(Utc::now().timestamp() + expires_in);
            }
        }
        self
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Sessions without a known expiry are never considered expired locally;
    /// the auth service is the judge.
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .map(|expiry| Utc::now() > expiry)
            .unwrap_or(false)
    }

    /// Check if the session will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        self.expires_at()
            .map(|expiry| Utc::now() > expiry - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS))
            .unwrap_or(false)
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.expires_at()
            .map(|expiry| (expiry - Utc::now()).num_minutes().max(0))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.has_refresh_token())
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user.as_ref().map(|u| u.id.as_str()))
            .finish()
    }
}
