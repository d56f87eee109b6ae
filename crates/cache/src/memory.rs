//! In-process expiring cache
//!
//! [`MemoryCache`] keeps entries in a `DashMap` so plain reads never take a
//! store-wide lock. Generation is serialized by one store-wide lock with a
//! recheck after acquiring it:
//!
//! ```text
//! get_or_set_with(key):
//!   1. optimistic read            -> hit? return
//!   2. acquire generation lock
//!   3. recheck                    -> hit? return (someone generated meanwhile)
//!   4. run generator, store, return
//! ```
//!
//! Threads that failed step 1 before the first generator finished will find
//! the value at step 3, so a burst of misses on one key costs one generator
//! call. The generation lock is reentrant: a generator may itself read
//! through the same cache (nested requests) without deadlocking.
//!
//! Expired entries are evicted lazily when touched, or in bulk with
//! [`MemoryCache::purge_expired`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use quill_core::Result;

use crate::store::{Cache, CacheValue, Expiration};

#[derive(Clone)]
struct Entry {
    value: CacheValue,
    expires_at: Option<Instant>,
    sliding: Option<Duration>,
}

impl Entry {
    fn new(value: CacheValue, expiration: Expiration, now: Instant) -> Self {
        let (expires_at, sliding) = match expiration {
            Expiration::Never => (None, None),
            Expiration::Absolute(ttl) => (Some(now + ttl), None),
            Expiration::AbsoluteAt(at) => (Some(at), None),
            Expiration::Sliding(ttl) => (Some(now + ttl), Some(ttl)),
        };
        Self {
            value,
            expires_at,
            sliding,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    fn touch(&mut self, now: Instant) {
        if let Some(ttl) = self.sliding {
            self.expires_at = Some(now + ttl);
        }
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live entry
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Generator invocations
    pub generations: u64,
    /// Entries dropped because they expired
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    generations: AtomicU64,
    evictions: AtomicU64,
}

/// In-process cache with absolute and sliding expiry
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    generation_lock: ReentrantMutex<()>,
    counters: Counters,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generation_lock: ReentrantMutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.counters
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(target: "quill::cache", removed, "Purged expired cache entries");
        }
        removed
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            generations: self.counters.generations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        {
            let mut entry = self.entries.get_mut(key)?;
            if !entry.is_expired(now) {
                entry.touch(now);
                return Some(entry.value.clone());
            }
        }
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(target: "quill::cache", key, "Evicted expired entry");
        }
        None
    }

    fn record(&self, hit: bool) {
        let counter = if hit {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Cache for MemoryCache {
    fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    fn set(&self, key: &str, value: CacheValue, expiration: Expiration) {
        self.entries
            .insert(key.to_string(), Entry::new(value, expiration, Instant::now()));
    }

    fn get(&self, key: &str) -> Option<CacheValue> {
        let found = self.lookup(key);
        self.record(found.is_some());
        found
    }

    fn get_or_set_with(
        &self,
        key: &str,
        expiration: Expiration,
        generate: &mut dyn FnMut() -> Result<CacheValue>,
    ) -> Result<CacheValue> {
        if let Some(value) = self.lookup(key) {
            self.record(true);
            trace!(target: "quill::cache", key, "Cache hit");
            return Ok(value);
        }

        let _guard = self.generation_lock.lock();
        if let Some(value) = self.lookup(key) {
            self.record(true);
            trace!(target: "quill::cache", key, "Cache hit after lock");
            return Ok(value);
        }

        self.record(false);
        let value = generate()?;
        self.counters.generations.fetch_add(1, Ordering::Relaxed);
        self.set(key, value.clone(), expiration);
        debug!(target: "quill::cache", key, ?expiration, "Cache entry generated");
        Ok(value)
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
