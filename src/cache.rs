//! In-memory memoization of natural keys to persisted ids.
//!
//! The cache is an optimization only: the catalog performs lookup-before-insert
//! against the store on every miss, so results are identical with the cache
//! disabled. One [`LookupCache`] is created per run and handed to the catalog;
//! tests build isolated instances.
//!
//! Each [`Namespace`] has its own lock. The lock is held for the whole
//! read-check-create cycle so two workers resolving the same key never both
//! run the create function.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Independent key spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Server name to server id.
    Servers,
    /// Quality label to quality id.
    Qualities,
    /// Media fingerprint to media item id.
    Media,
    /// (series id, season number) to season id.
    Seasons,
    /// (season id, episode number) to episode id.
    Episodes,
}

impl Namespace {
    const ALL: [Self; 5] = [
        Self::Servers,
        Self::Qualities,
        Self::Media,
        Self::Seasons,
        Self::Episodes,
    ];

    fn index(self) -> usize {
        match self {
            Self::Servers => 0,
            Self::Qualities => 1,
            Self::Media => 2,
            Self::Seasons => 3,
            Self::Episodes => 4,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Servers => "servers",
            Self::Qualities => "qualities",
            Self::Media => "media",
            Self::Seasons => "seasons",
            Self::Episodes => "episodes",
        };
        write!(f, "{label}")
    }
}

/// A value that can be produced by a create function and rebuilt from a cached id.
pub trait CacheEntry {
    /// The persisted id to memoize.
    fn id(&self) -> i64;

    /// Rebuilds the value for a cache hit.
    fn from_cached(id: i64) -> Self;
}

impl CacheEntry for i64 {
    fn id(&self) -> i64 {
        *self
    }

    fn from_cached(id: i64) -> Self {
        id
    }
}

/// Process-wide natural-key cache, passed by handle into each stage.
#[derive(Debug)]
pub struct LookupCache {
    enabled: AtomicBool,
    namespaces: [Mutex<HashMap<String, i64>>; 5],
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LookupCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            namespaces: Namespace::ALL.map(|_| Mutex::new(HashMap::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns whether lookups are served from memory.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enables or bypasses the cache. Bypassing does not clear stored entries.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns the cached id for `key`, or runs `create_fn` and memoizes its id.
    ///
    /// When the cache is disabled `create_fn` always runs and nothing is stored.
    /// Errors from `create_fn` are returned as-is and leave the cache untouched.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `create_fn`.
    pub async fn get_or_create<T, E, F, Fut>(
        &self,
        namespace: Namespace,
        key: &str,
        create_fn: F,
    ) -> Result<T, E>
    where
        T: CacheEntry,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_enabled() {
            return create_fn().await;
        }

        let mut entries = self.namespaces[namespace.index()].lock().await;
        if let Some(&id) = entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(%namespace, key, id, "cache hit");
            return Ok(T::from_cached(id));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = create_fn().await?;
        entries.insert(key.to_string(), value.id());
        trace!(%namespace, key, id = value.id(), "cache filled");
        Ok(value)
    }

    /// Forgets a key, e.g. after the row it pointed to changed its natural key.
    pub async fn invalidate(&self, namespace: Namespace, key: &str) {
        self.namespaces[namespace.index()].lock().await.remove(key);
    }

    /// Empties every namespace and resets the counters.
    pub async fn clear(&self) {
        for namespace in &self.namespaces {
            namespace.lock().await.clear();
        }
        self.hits.store(0, Ordering::SeqCst);
        self.misses.store(0, Ordering::SeqCst);
        debug!("lookup cache cleared");
    }

    /// Number of entries stored in a namespace.
    pub async fn entry_count(&self, namespace: Namespace) -> usize {
        self.namespaces[namespace.index()].lock().await.len()
    }

    /// Lookups answered from memory.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that ran the create function.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
