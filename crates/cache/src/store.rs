//! The cache store abstraction
//!
//! [`Cache`] is object safe so executors can share one `Arc<dyn Cache>`.
//! Values are type-erased (`Arc<dyn Any + Send + Sync>`); [`CacheExt`]
//! adds typed accessors on top.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quill_core::Result;

/// A type-erased cached value
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// When a cache entry stops being valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Entry lives until removed
    #[default]
    Never,
    /// Entry expires a fixed duration after it was stored
    Absolute(Duration),
    /// Entry expires at a fixed instant
    AbsoluteAt(Instant),
    /// Entry expires once it has not been read for the duration
    Sliding(Duration),
}

/// Key/value store with expiry semantics.
///
/// Implementations must be safe to share across threads. `get_or_set_with`
/// is the through-cache primitive: it returns the cached value for `key`,
/// or runs `generate`, stores its result and returns it. Generator errors
/// are returned and nothing is stored.
pub trait Cache: Send + Sync {
    /// Whether a live entry exists for `key`
    fn contains_key(&self, key: &str) -> bool;

    /// Store a value, replacing any existing entry
    fn set(&self, key: &str, value: CacheValue, expiration: Expiration);

    /// Fetch a live entry, refreshing sliding expiry
    fn get(&self, key: &str) -> Option<CacheValue>;

    /// Fetch or generate-and-store
    fn get_or_set_with(
        &self,
        key: &str,
        expiration: Expiration,
        generate: &mut dyn FnMut() -> Result<CacheValue>,
    ) -> Result<CacheValue>;

    /// Remove an entry; returns whether one existed
    fn remove(&self, key: &str) -> bool;

    /// Remove every entry
    fn clear(&self);
}

/// Typed helpers over [`Cache`]
pub trait CacheExt: Cache {
    /// Fetch a value of type `T`; entries of another type read as absent
    fn get_as<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get(key).and_then(|v| v.downcast_ref::<T>().cloned())
    }

    /// Fetch a value of type `T` or return `default`
    fn get_or_default<T>(&self, key: &str, default: T) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get_as(key).unwrap_or(default)
    }

    /// Store a typed value
    fn set_value<T>(&self, key: &str, value: T, expiration: Expiration)
    where
        T: Send + Sync + 'static,
    {
        self.set(key, Arc::new(value), expiration);
    }

    /// Fetch a typed value or generate-and-store it
    fn get_or_set<T, F>(&self, key: &str, expiration: Expiration, generate: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        let mut generate = Some(generate);
        let value = self.get_or_set_with(key, expiration, &mut || {
            let generate = generate
                .take()
                .ok_or_else(|| quill_core::Error::internal("cache generator invoked twice"))?;
            Ok(Arc::new(generate()?) as CacheValue)
        })?;
        match value.downcast_ref::<T>() {
            Some(v) => Ok(v.clone()),
            None => Err(quill_core::Error::internal(format!(
                "cache entry '{}' does not hold a {}",
                key,
                std::any::type_name::<T>()
            ))),
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// A store that caches nothing.
///
/// Reads miss, writes are dropped, and `get_or_set_with` always runs the
/// generator. Used when caching is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl NoCache {
    /// Shareable handle
    pub fn shared() -> Arc<dyn Cache> {
        Arc::new(NoCache)
    }
}

impl Cache for NoCache {
    fn contains_key(&self, _key: &str) -> bool {
        false
    }

    fn set(&self, _key: &str, _value: CacheValue, _expiration: Expiration) {}

    fn get(&self, _key: &str) -> Option<CacheValue> {
        None
    }

    fn get_or_set_with(
        &self,
        _key: &str,
        _expiration: Expiration,
        generate: &mut dyn FnMut() -> Result<CacheValue>,
    ) -> Result<CacheValue> {
        generate()
    }

    fn remove(&self, _key: &str) -> bool {
        false
    }

    fn clear(&self) {}
}
