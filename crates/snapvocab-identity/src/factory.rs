//! Client factory for the UI/runtime process.
//!
//! The execution context is decided once, from an injected platform probe,
//! and every client the factory builds is configured for it:
//!
//! | context  | storage                    | refresh | persist | URL detection |
//! |----------|----------------------------|---------|---------|---------------|
//! | `native` | OS keychain adapter        | on      | on      | off           |
//! | `web`    | client default (cookies)   | on      | on      | on            |
//!
//! Building a client allocates only; no network or keychain I/O happens
//! until the client is used.
//!
//! A `web` client keeps its session in the client's own cookie jar. Embedded
//! in a browser that jar is the browser's; in a plain process it is memory,
//! so the session ends with the client. Server routes that need the session
//! to outlive the process use `RequestIdentityResolver` with the request's
//! cookies instead.

use tracing::debug;

use crate::backend::{AuthBackend, GoTrueBackend};
use crate::client::{ClientOptions, IdentityClient};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::platform::{ExecutionContext, PlatformCapability};
use crate::storage::{KeychainStorage, StorageAdapter};

#[derive(Debug, Clone)]
pub struct ClientFactory {
    config: BackendConfig,
    context: ExecutionContext,
}

impl ClientFactory {
    /// Probe the bridge once; a missing bridge means `web`
    pub fn new(config: BackendConfig, bridge: Option<&dyn PlatformCapability>) -> Self {
        Self::with_context(config, ExecutionContext::detect(bridge))
    }

    pub fn with_context(config: BackendConfig, context: ExecutionContext) -> Self {
        debug!(%context, "Client factory configured");
        Self { config, context }
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            auto_refresh_token: true,
            persist_session: true,
            // Mobile has no redirect-based sign-in flow
            detect_session_in_url: !self.context.is_native(),
        }
    }

    fn storage(&self) -> Option<Box<dyn StorageAdapter>> {
        match self.context {
            ExecutionContext::Native => Some(Box::new(KeychainStorage::new(
                self.config.keychain_service.clone(),
            ))),
            ExecutionContext::Web => None,
        }
    }

    /// Build a client talking to the configured auth service
    pub fn build(&self) -> Result<IdentityClient<GoTrueBackend>, BackendError> {
        let backend = GoTrueBackend::new(self.config.clone())?;
        Ok(self.build_with(backend))
    }

    /// Build a client around an already constructed backend
    pub fn build_with<B: AuthBackend>(&self, backend: B) -> IdentityClient<B> {
        IdentityClient::new(
            backend,
            self.config.storage_key(),
            self.options(),
            self.storage(),
        )
    }
}
