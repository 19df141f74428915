//! In-memory auth service for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::backend::AuthBackend;
use crate::error::BackendError;
use crate::session::{Session, User};

pub const KEY: &str = "sb-test-auth-token";

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    refresh: HashMap<String, (String, User)>,
    validated: Vec<String>,
    signed_out: Vec<String>,
    server_error: bool,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
}

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: Some(format!("{}@example.com", id)),
        phone: None,
        role: Some("authenticated".to_string()),
        aud: Some("authenticated".to_string()),
        created_at: None,
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `access_token` as belonging to `user_id`
    pub fn with_user(self, access_token: &str, user_id: &str) -> Self {
        self.state
            .lock()
            .users
            .insert(access_token.to_string(), user(user_id));
        self
    }

    /// Accept `refresh_token`, rotating to `new_access_token`
    pub fn with_refresh(self, refresh_token: &str, new_access_token: &str, user_id: &str) -> Self {
        {
            let mut state = self.state.lock();
            state
                .refresh
                .insert(refresh_token.to_string(), (new_access_token.to_string(), user(user_id)));
            state
                .users
                .insert(new_access_token.to_string(), user(user_id));
        }
        self
    }

    /// Fail every validation with a 5xx
    pub fn with_server_error(self) -> Self {
        self.state.lock().server_error = true;
        self
    }

    /// Access tokens passed to `get_user`, in call order
    pub fn validated_tokens(&self) -> Vec<String> {
        self.state.lock().validated.clone()
    }

    pub fn signed_out_tokens(&self) -> Vec<String> {
        self.state.lock().signed_out.clone()
    }
}

/// A stored session JSON for `access_token`
pub fn session_json(access_token: &str, refresh_token: &str, expires_at: Option<i64>) -> String {
    let session = Session {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        token_type: "bearer".to_string(),
        expires_in: None,
        expires_at,
        user: None,
    };
    serde_json::to_string(&session).unwrap()
}

#[async_trait]
impl AuthBackend for FakeBackend {
    async fn get_user(&self, access_token: &str) -> Result<User, BackendError> {
        let mut state = self.state.lock();
        state.validated.push(access_token.to_string());
        if state.server_error {
            return Err(BackendError::ServerError("unavailable".to_string()));
        }
        state
            .users
            .get(access_token)
            .cloned()
            .ok_or(BackendError::Unauthorized)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let state = self.state.lock();
        let (access_token, user) = state
            .refresh
            .get(refresh_token)
            .cloned()
            .ok_or(BackendError::Unauthorized)?;

        Ok(Session {
            access_token,
            refresh_token: format!("{}-rotated", refresh_token),
            token_type: "bearer".to_string(),
            expires_in: Some(3600),
            expires_at: Some(Utc::now().timestamp() + 3600),
            user: Some(user),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        self.state.lock().signed_out.push(access_token.to_string());
        Ok(())
    }
}
