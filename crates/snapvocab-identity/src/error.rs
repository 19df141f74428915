use thiserror::Error;

/// Startup-time misconfiguration. The only failure allowed to abort startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration value {0}")]
    Missing(&'static str),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Failures of a storage adapter or the cookie jar behind it.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Secure storage error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Cookie write rejected: {0}")]
    WriteRejected(String),

    #[error("Failed to encode session: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No secure storage backend on this platform")]
    Unavailable,

    #[error("Stored value is unreadable: {0}")]
    Corrupt(String),
}

/// Errors reported by the hosted auth service.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl BackendError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 | 403 => BackendError::Unauthorized,
            500..=599 => BackendError::ServerError(truncated),
            _ => BackendError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

/// Outcome errors of identity resolution.
///
/// These are data, not control flow: the resolver hands them back to the
/// route, which maps them to its own (generic) response.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// No authenticated principal after every credential source was tried.
    #[error("Unauthorized")]
    Unauthorized,

    /// An `Authorization` header was present but not bearer-shaped.
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    /// The auth service failed while validating a session.
    #[error("Upstream validation failure: {0}")]
    Upstream(BackendError),

    #[error("Storage write failure: {0}")]
    Storage(#[from] StorageError),
}

impl From<BackendError> for IdentityError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized => IdentityError::Unauthorized,
            other => IdentityError::Upstream(other),
        }
    }
}

impl IdentityError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, IdentityError::Unauthorized)
    }
}

pub type Result<T, E = IdentityError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            BackendError::from_status(StatusCode::UNAUTHORIZED, "bad jwt"),
            BackendError::Unauthorized
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::FORBIDDEN, ""),
            BackendError::Unauthorized
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::BAD_GATEWAY, "down"),
            BackendError::ServerError(ref body) if body == "down"
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::IM_A_TEAPOT, ""),
            BackendError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_truncate_body() {
        let body = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let truncated = BackendError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("510 total bytes"));
    }

    #[test]
    fn test_backend_unauthorized_maps_to_identity_unauthorized() {
        let err: IdentityError = BackendError::Unauthorized.into();
        assert!(err.is_unauthorized());

        let err: IdentityError = BackendError::ServerError("boom".into()).into();
        assert!(matches!(err, IdentityError::Upstream(_)));
    }
}
