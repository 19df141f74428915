//! Identity resolution for SnapVocab.
//!
//! The same hosted auth service backs both the web app and the native shell,
//! but each platform holds its credential differently: the browser keeps the
//! session in cookies, the native app keeps it in the OS keychain and sends it
//! as a bearer token.
//!
//! This crate provides:
//! - [`ClientFactory`]: builds an [`IdentityClient`] for the detected
//!   [`ExecutionContext`], with the matching session storage
//! - [`RequestIdentityResolver`]: resolves the caller of one server request
//!   from its bearer header or cookie session
//!
//! Credentials are opaque here. Validation is always done by the auth service.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod platform;
pub mod resolver;
pub mod session;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use backend::{AuthBackend, GoTrueBackend};
pub use client::{ClientOptions, IdentityClient};
pub use config::BackendConfig;
pub use error::{BackendError, ConfigError, IdentityError, StorageError};
pub use factory::ClientFactory;
pub use platform::{EnvBridge, ExecutionContext, PlatformCapability, TargetBridge};
pub use resolver::{
    bearer_credential, CredentialSource, InvalidBearerPolicy, RequestIdentityResolver,
    Resolution,
};
pub use session::{Credential, Session, User};
pub use storage::{CookieJar, RequestCookies, StorageAdapter, StorageKind};
