//! Persistent session storage.
//!
//! This module provides:
//! - `StorageAdapter`: the key-value capability an identity client persists
//!   its session through
//! - `CookieStorage`: an adapter over a `CookieJar` (browser jar or the
//!   cookies of a single server request)
//! - `KeychainStorage`: an adapter over the OS secure storage used by the
//!   native shell
//!
//! An adapter is constructed once per client and owned by that client alone.

pub mod cookie;
pub mod keychain;

pub use cookie::{
    CookieEntry, CookieJar, CookieOptions, CookieStorage, MemoryCookieJar, RequestCookies,
    SameSite,
};
pub use keychain::KeychainStorage;

use crate::error::StorageError;

/// Which persistence backend a client writes its session to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Cookie jar managed by the hosting platform (browser or request)
    Cookies,
    /// OS secure storage of the native shell
    SecureKeychain,
}

pub trait StorageAdapter: Send + Sync {
    fn kind(&self) -> StorageKind;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Succeeds when the key does not exist.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
