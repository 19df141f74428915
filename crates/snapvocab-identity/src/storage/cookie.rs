//! Cookie-backed session storage.
//!
//! Session values are percent-encoded and stored under the storage key as a
//! cookie. Values longer than [`MAX_CHUNK_SIZE`] are split across chunk
//! cookies `<key>.0`, `<key>.1`, ... and joined again on read. Every write
//! expires the cookies of the previous layout that it no longer uses.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use tracing::{debug, warn};

use super::{StorageAdapter, StorageKind};
use crate::error::StorageError;

/// Largest cookie value written before a value is split into chunks.
/// Keeps each `Set-Cookie` comfortably under the 4096 byte browser limit.
pub const MAX_CHUNK_SIZE: usize = 3180;

/// Lifetime of session cookies: 400 days, the longest browsers honour.
const DEFAULT_MAX_AGE_SECS: i64 = 400 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Lax => write!(f, "Lax"),
            SameSite::Strict => write!(f, "Strict"),
            SameSite::None => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub max_age: Option<i64>,
    /// Off by default: the browser-side client has to read the session cookie.
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age: Some(DEFAULT_MAX_AGE_SECS),
            http_only: false,
            secure: true,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieOptions {
    fn expired(&self) -> Self {
        Self {
            max_age: Some(0),
            ..self.clone()
        }
    }
}

/// A cookie to be written, with its attributes.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

impl CookieEntry {
    pub fn is_removal(&self) -> bool {
        self.options.max_age == Some(0)
    }

    /// Render as a `Set-Cookie` header value
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.options.path);
        if let Some(max_age) = self.options.max_age {
            header.push_str(&format!("; Max-Age={}", max_age));
        }
        header.push_str(&format!("; SameSite={}", self.options.same_site));
        if self.options.secure {
            header.push_str("; Secure");
        }
        if self.options.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

impl fmt::Debug for CookieEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieEntry")
            .field("name", &self.name)
            .field("value_len", &self.value.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Cookie capability of the hosting platform.
pub trait CookieJar: Send + Sync {
    /// All cookies visible to the current context, as `(name, value)` pairs
    fn get_all(&self) -> Vec<(String, String)>;

    /// Apply writes; entries with `Max-Age=0` delete the cookie
    fn set_all(&self, entries: &[CookieEntry]) -> Result<(), StorageError>;
}

/// Whether `name` is `key` itself or one of its chunk cookies
fn belongs_to(name: &str, key: &str) -> bool {
    name == key
        || name
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('.'))
            .map(|index| index.parse::<usize>().is_ok())
            .unwrap_or(false)
}

fn chunk_name(key: &str, index: usize) -> String {
    format!("{}.{}", key, index)
}

/// [`StorageAdapter`] over a [`CookieJar`].
pub struct CookieStorage<J> {
    jar: J,
    options: CookieOptions,
}

impl<J: CookieJar> CookieStorage<J> {
    pub fn new(jar: J) -> Self {
        Self::with_options(jar, CookieOptions::default())
    }

    pub fn with_options(jar: J, options: CookieOptions) -> Self {
        Self { jar, options }
    }

    /// Raw (still encoded) value, joined from chunks if necessary
    fn read_raw(&self, key: &str) -> Option<String> {
        let cookies: BTreeMap<String, String> = self.jar.get_all().into_iter().collect();

        if let Some(value) = cookies.get(key) {
            return Some(value.clone());
        }

        let mut joined = String::new();
        let mut index = 0;
        while let Some(chunk) = cookies.get(&chunk_name(key, index)) {
            joined.push_str(chunk);
            index += 1;
        }

        if index == 0 {
            None
        } else {
            Some(joined)
        }
    }

    /// Cookies currently stored for `key`, in any layout
    fn existing_names(&self, key: &str) -> Vec<String> {
        self.jar
            .get_all()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| belongs_to(name, key))
            .collect()
    }

    fn removals(&self, names: impl IntoIterator<Item = String>) -> Vec<CookieEntry> {
        let expired = self.options.expired();
        names
            .into_iter()
            .map(|name| CookieEntry {
                name,
                value: String::new(),
                options: expired.clone(),
            })
            .collect()
    }
}

impl<J: CookieJar> StorageAdapter for CookieStorage<J> {
    fn kind(&self) -> StorageKind {
        StorageKind::Cookies
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.read_raw(key) {
            Some(raw) => urlencoding::decode(&raw)
                .map(|value| Some(value.into_owned()))
                .map_err(|e| StorageError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let encoded = urlencoding::encode(value).into_owned();

        // Encoded values are ASCII, so byte offsets are char boundaries
        let mut entries: Vec<CookieEntry> = if encoded.len() <= MAX_CHUNK_SIZE {
            vec![CookieEntry {
                name: key.to_string(),
                value: encoded,
                options: self.options.clone(),
            }]
        } else {
            encoded
                .as_bytes()
                .chunks(MAX_CHUNK_SIZE)
                .enumerate()
                .map(|(index, chunk)| CookieEntry {
                    name: chunk_name(key, index),
                    value: String::from_utf8_lossy(chunk).into_owned(),
                    options: self.options.clone(),
                })
                .collect()
        };

        let stale: Vec<String> = self
            .existing_names(key)
            .into_iter()
            .filter(|name| !entries.iter().any(|entry| &entry.name == name))
            .collect();
        entries.extend(self.removals(stale));

        debug!(key, cookies = entries.len(), "Writing session cookies");
        self.jar.set_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let names = self.existing_names(key);
        if names.is_empty() {
            return Ok(());
        }
        self.jar.set_all(&self.removals(names))
    }
}

/// Cookie jar held in process memory. The default storage of web clients.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    cookies: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cookies.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.lock().is_empty()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get_all(&self) -> Vec<(String, String)> {
        self.cookies
            .lock()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn set_all(&self, entries: &[CookieEntry]) -> Result<(), StorageError> {
        let mut cookies = self.cookies.lock();
        for entry in entries {
            if entry.is_removal() {
                cookies.remove(&entry.name);
            } else {
                cookies.insert(entry.name.clone(), entry.value.clone());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RequestCookiesInner {
    cookies: Vec<(String, String)>,
    pending: Vec<CookieEntry>,
    committed: bool,
}

/// The cookies of one inbound request, plus the `Set-Cookie` writes destined
/// for its response.
///
/// Clones share state, so route code keeps a handle while the identity client
/// owns another. Writes after [`RequestCookies::commit`] are rejected, as
/// they would be once response headers have been sent.
#[derive(Debug, Clone, Default)]
pub struct RequestCookies {
    inner: Arc<Mutex<RequestCookiesInner>>,
}

impl RequestCookies {
    /// Parse every `Cookie` header of a request
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let cookies = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| match value.to_str() {
                Ok(s) => Some(s),
                Err(_) => {
                    warn!("Ignoring non-ASCII Cookie header");
                    None
                }
            })
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.trim().to_string()))
            })
            .collect();

        Self {
            inner: Arc::new(Mutex::new(RequestCookiesInner {
                cookies,
                ..Default::default()
            })),
        }
    }

    /// Mark response headers as sent; later writes fail
    pub fn commit(&self) {
        self.inner.lock().committed = true;
    }

    /// Writes accepted so far, in order
    pub fn pending(&self) -> Vec<CookieEntry> {
        self.inner.lock().pending.clone()
    }

    /// Drain pending writes into `Set-Cookie` headers of a response
    pub fn write_set_cookie_headers(&self, headers: &mut HeaderMap) {
        let pending = std::mem::take(&mut self.inner.lock().pending);
        for entry in pending {
            match HeaderValue::from_str(&entry.to_set_cookie()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => warn!(name = %entry.name, error = %e, "Dropping unrepresentable cookie"),
            }
        }
    }
}

impl CookieJar for RequestCookies {
    fn get_all(&self) -> Vec<(String, String)> {
        self.inner.lock().cookies.clone()
    }

    fn set_all(&self, entries: &[CookieEntry]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.committed {
            return Err(StorageError::WriteRejected(
                "response headers already committed".to_string(),
            ));
        }

        // Later reads in this request see the rotated values
        for entry in entries {
            inner.cookies.retain(|(name, _)| name != &entry.name);
            if !entry.is_removal() {
                inner.cookies.push((entry.name.clone(), entry.value.clone()));
            }
        }
        inner.pending.extend(entries.iter().cloned());
        Ok(())
    }
}
