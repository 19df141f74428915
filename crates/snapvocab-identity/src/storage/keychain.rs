use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keyring::Entry;
use parking_lot::Mutex;
use tracing::debug;

use super::{StorageAdapter, StorageKind};
use crate::error::StorageError;

/// Targets built with a platform keyring backend (see the crate manifest).
/// Anywhere else keyring silently falls back to its in-process mock store.
const PLATFORM_STORE: bool = cfg!(any(
    test,
    target_os = "macos",
    target_os = "ios",
    target_os = "windows",
    target_os = "linux"
));

/// Session storage in the OS keychain (Keychain on iOS/macOS, Credential
/// Manager on Windows, the kernel keyring on Linux).
///
/// Entries are opened on first use and reused afterwards, so constructing the
/// adapter never touches the keychain.
pub struct KeychainStorage {
    service: String,
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

impl KeychainStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Arc<Entry>, StorageError> {
        if !PLATFORM_STORE {
            return Err(StorageError::Unavailable);
        }

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            return Ok(entry.clone());
        }
        let entry = Arc::new(Entry::new(&self.service, key)?);
        entries.insert(key.to_string(), entry.clone());
        Ok(entry)
    }
}

impl fmt::Debug for KeychainStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeychainStorage")
            .field("service", &self.service)
            .field("open_entries", &self.entries.lock().len())
            .finish()
    }
}

impl StorageAdapter for KeychainStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::SecureKeychain
    }

    /// Retrieve the value stored for a key
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a value in the keychain, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?.set_password(value)?;
        debug!(service = %self.service, key, "Stored value in keychain");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
