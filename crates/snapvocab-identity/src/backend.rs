//! Client for the hosted auth service.
//!
//! The identity layer needs three things from the service: validate an access
//! token and return its user, exchange a refresh token for a new session, and
//! revoke a session. Verification happens entirely on the service side.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::session::{Session, User};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Validate an access token and return the principal it belongs to
    async fn get_user(&self, access_token: &str) -> Result<User, BackendError>;

    /// Exchange a refresh token for a fresh session
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError>;

    /// Revoke the session behind an access token
    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// [`AuthBackend`] over the GoTrue-style REST API (`/auth/v1/...`).
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct GoTrueBackend {
    client: Client,
    config: BackendConfig,
}

impl GoTrueBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, config })
    }

    fn headers(&self, access_token: Option<&str>) -> Result<header::HeaderMap, BackendError> {
        let mut headers = header::HeaderMap::new();
        headers.insert("apikey", Self::header_value(&self.config.anon_key)?);
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(token) = access_token {
            headers.insert(
                header::AUTHORIZATION,
                Self::header_value(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    fn header_value(value: &str) -> Result<header::HeaderValue, BackendError> {
        header::HeaderValue::from_str(value)
            .map_err(|_| BackendError::InvalidResponse("credential is not a valid header value".into()))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl AuthBackend for GoTrueBackend {
    async fn get_user(&self, access_token: &str) -> Result<User, BackendError> {
        let response = self
            .client
            .get(self.config.auth_url("user"))
            .headers(self.headers(Some(access_token))?)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let user: User = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse user: {}", e)))?;

        debug!(user_id = %user.id, "Access token validated");
        Ok(user)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let response = self
            .client
            .post(self.config.auth_url("token?grant_type=refresh_token"))
            .headers(self.headers(None)?)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let session: Session = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse session: {}", e)))?;

        debug!("Session refreshed");
        Ok(session.with_computed_expiry())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.config.auth_url("logout"))
            .headers(self.headers(Some(access_token))?)
            .send()
            .await?;

        Self::check_response(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> GoTrueBackend {
        let config = BackendConfig::new("https://abcdefgh.supabase.co", "anon").unwrap();
        GoTrueBackend::new(config).unwrap()
    }

    #[test]
    fn test_headers_carry_key_and_bearer() {
        let headers = backend().headers(Some("tok")).unwrap();
        assert_eq!(headers.get("apikey").unwrap(), "anon");
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer tok");

        let headers = backend().headers(None).unwrap();
        assert!(headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_rejects_tokens_that_cannot_be_headers() {
        assert!(backend().headers(Some("bad\ntoken")).is_err());
    }
}
