//! Cache Mirror
//!
//! Optional persistence of fetched pages so a revisited feed resumes where
//! the user left off. The store is plain string key-value — serialization
//! stays on this side of the contract, so a host can back it with browser
//! localStorage, a file, or anything else that holds strings.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::fetch::Page;

// ============================================================================
// StateStore capability
// ============================================================================

/// Why a value could not be persisted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backing storage is full
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// String key-value persistence capability.
pub trait StateStore {
    /// Read a value by key. None if not present.
    fn load(&self, key: &str) -> Option<String>;

    /// Write a value under key. Fails when the backend rejects the write
    /// (quota, I/O); the caller rolls back its in-memory state.
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key.
    fn remove(&mut self, key: &str);
}

impl<T: StateStore> StateStore for &mut T {
    fn load(&self, key: &str) -> Option<String> {
        (**self).load(key)
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).save(key, value)
    }

    fn remove(&mut self, key: &str) {
        (**self).remove(key)
    }
}

/// In-memory store, optionally capped at a total number of stored value
/// bytes to model quota exhaustion.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store refusing writes once total value bytes would exceed `bytes`.
    pub fn with_capacity_limit(bytes: usize) -> Self {
        Self { entries: HashMap::new(), capacity: Some(bytes) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(capacity) = self.capacity {
            let others: usize = self
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if others + value.len() > capacity {
                return Err(StoreError::QuotaExceeded);
            }
        }
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

// ============================================================================
// Keys & policy
// ============================================================================

/// Persisted key names, namespaced per feed instance so multiple containers
/// can cache side by side in one store.
#[derive(Clone, Debug)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(namespace: &str) -> Self {
        Self { prefix: namespace.to_owned() }
    }

    /// Serialized list of raw page responses, in fetch order
    pub fn pages(&self) -> String {
        format!("{}.pages", self.prefix)
    }

    /// Running offset after the last mirrored fetch
    pub fn offset(&self) -> String {
        format!("{}.offset", self.prefix)
    }

    /// Last observed scroll position
    pub fn scroll_top(&self) -> String {
        format!("{}.scroll_top", self.prefix)
    }

    /// URL resolved at offset 0; a mismatch invalidates everything
    pub fn source(&self) -> String {
        format!("{}.source", self.prefix)
    }

    /// Unix-millisecond instant after which the cache is stale
    pub fn expires_at(&self) -> String {
        format!("{}.expires_at", self.prefix)
    }

    pub fn all(&self) -> [String; 5] {
        [
            self.pages(),
            self.offset(),
            self.scroll_top(),
            self.source(),
            self.expires_at(),
        ]
    }
}

/// How a feed instance caches: under which namespace, and for how long.
#[derive(Clone, Debug)]
pub struct CachePolicy {
    pub namespace: String,
    pub expiration: std::time::Duration,
}

impl CachePolicy {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), ..Self::default() }
    }

    pub fn with_expiration(mut self, expiration: std::time::Duration) -> Self {
        self.expiration = expiration;
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            namespace: "scrollfeed".to_owned(),
            expiration: std::time::Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Clear every persisted key under `namespace`. The "flush" command: usable
/// without constructing a feed instance.
pub fn flush_namespace<S: StateStore>(store: &mut S, namespace: &str) {
    for key in CacheKeys::new(namespace).all() {
        store.remove(&key);
    }
}

// ============================================================================
// CacheMirror
// ============================================================================

/// In-memory mirror of the persisted page list plus the persistence logic
/// around it. The engine owns one when caching is enabled.
pub struct CacheMirror<S> {
    store: S,
    keys: CacheKeys,
    expiration: std::time::Duration,
    pages: Vec<Page>,
}

impl<S: StateStore> CacheMirror<S> {
    pub fn new(store: S, policy: CachePolicy) -> Self {
        Self {
            store,
            keys: CacheKeys::new(&policy.namespace),
            expiration: policy.expiration,
            pages: Vec::new(),
        }
    }

    /// Validate persisted state against the offset-0 source URL and the
    /// stored expiration instant, discarding it wholesale when stale, then
    /// load (or seed) the page list. Returns the pages to replay — empty for
    /// a fresh cache.
    pub fn open(&mut self, source: &str, initial_offset: u64, now_ms: u64) -> &[Page] {
        if self.store.load(&self.keys.source()).as_deref() != Some(source) {
            tracing::debug!("cache source changed, discarding persisted state");
            self.flush();
        } else if self.stored_expires_at().is_some_and(|at| at < now_ms) {
            tracing::debug!("cache expired, discarding persisted state");
            self.flush();
        }

        match self.store.load(&self.keys.pages()) {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(pages) => self.pages = pages,
                Err(e) => {
                    tracing::warn!("persisted page list unreadable ({}), reseeding", e);
                    self.flush();
                    self.seed(source, initial_offset, now_ms);
                }
            },
            None => self.seed(source, initial_offset, now_ms),
        }
        &self.pages
    }

    fn seed(&mut self, source: &str, initial_offset: u64, now_ms: u64) {
        self.pages.clear();
        let expires_at = now_ms + self.expiration.as_millis() as u64;
        self.save(&self.keys.source(), source);
        self.save(&self.keys.expires_at(), &expires_at.to_string());
        self.save(&self.keys.offset(), &initial_offset.to_string());
        self.save(&self.keys.pages(), "[]");
        self.save(&self.keys.scroll_top(), "0");
    }

    /// Append a freshly fetched page and persist the updated list. When the
    /// write fails the page is popped back off so memory and storage agree.
    pub fn append(&mut self, page: Page) -> Result<(), StoreError> {
        self.pages.push(page);
        let result = serde_json::to_string(&self.pages)
            .map_err(|e| StoreError::Backend(e.to_string()))
            .and_then(|raw| self.store.save(&self.keys.pages(), &raw));
        if result.is_err() {
            self.pages.pop();
        }
        result
    }

    pub fn persist_offset(&mut self, offset: u64) {
        self.save(&self.keys.offset(), &offset.to_string());
    }

    pub fn persist_scroll_top(&mut self, scroll_top: f64) {
        self.save(&self.keys.scroll_top(), &scroll_top.to_string());
    }

    pub fn stored_offset(&self) -> Option<u64> {
        self.store.load(&self.keys.offset())?.parse().ok()
    }

    pub fn stored_scroll_top(&self) -> Option<f64> {
        self.store.load(&self.keys.scroll_top())?.parse().ok()
    }

    fn stored_expires_at(&self) -> Option<u64> {
        self.store.load(&self.keys.expires_at())?.parse().ok()
    }

    /// Pages currently mirrored in memory.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Drop all persisted keys and the in-memory mirror.
    pub fn flush(&mut self) {
        for key in self.keys.all() {
            self.store.remove(&key);
        }
        self.pages.clear();
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // Offset/scroll writes are best-effort; only the page list write is
    // allowed to fail loudly enough to roll back.
    fn save(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.save(key, value) {
            tracing::warn!("failed to persist {}: {}", key, e);
        }
    }
}
