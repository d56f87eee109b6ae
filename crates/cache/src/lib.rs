//! Cache layer for Quill
//!
//! - [`Cache`]: object-safe key/value store with expiry
//! - [`NoCache`]: store that never caches
//! - [`MemoryCache`]: in-process expiring store with locked get-or-generate
//! - [`CachePolicy`] / [`KeyField`] / [`derive_key`]: deterministic request keys

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod key;
pub mod memory;
pub mod store;

pub use key::{derive_key, resolve_fields, CachePolicy, ExpirationKind, KeyField, KeyValue, NULL_MARKER};
pub use memory::{CacheStats, MemoryCache};
pub use store::{Cache, CacheExt, CacheValue, Expiration, NoCache};
