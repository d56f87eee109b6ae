//! Cache policies and cache-key derivation
//!
//! A cacheable request type declares a [`CachePolicy`] and lists the fields
//! that may contribute to its key as [`KeyField`]s. [`derive_key`] turns
//! them into a deterministic string:
//!
//! ```text
//! FindPersonById-Id:5
//! PeopleByIds-Ids::1,2,3-Active:true
//! PeopleByIds-Ids::(null)
//! ```
//!
//! Scalars render as `name:value`, collections as `name::a,b,c`, and an
//! empty or absent collection as `name::(null)`. Segments follow the order
//! of the policy's `key_fields`, or the listing order when the policy names
//! none.

use std::fmt::{Display, Write};
use std::time::Duration;

use quill_core::{Error, Result};

use crate::store::Expiration;

/// Marker rendered for an empty or absent collection field
pub const NULL_MARKER: &str = "(null)";

/// How a cached request result expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpirationKind {
    /// Fixed lifetime from the moment it is stored
    #[default]
    Absolute,
    /// Lifetime renewed on every read
    Sliding,
}

/// Declared caching behavior of a request type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Whether results are cached at all
    pub enabled: bool,
    /// Absolute or sliding expiry
    pub kind: ExpirationKind,
    /// Entry lifetime; zero means no expiry
    pub ttl: Duration,
    /// Fields contributing to the key; empty means every listed field
    pub key_fields: Vec<&'static str>,
}

impl CachePolicy {
    /// Caching switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            kind: ExpirationKind::Absolute,
            ttl: Duration::ZERO,
            key_fields: Vec::new(),
        }
    }

    /// Cache with a fixed lifetime
    pub fn absolute(ttl: Duration) -> Self {
        Self {
            enabled: true,
            kind: ExpirationKind::Absolute,
            ttl,
            key_fields: Vec::new(),
        }
    }

    /// Cache with a lifetime renewed on read
    pub fn sliding(ttl: Duration) -> Self {
        Self {
            enabled: true,
            kind: ExpirationKind::Sliding,
            ttl,
            key_fields: Vec::new(),
        }
    }

    /// [`CachePolicy::absolute`] in whole seconds
    pub fn absolute_secs(secs: u64) -> Self {
        Self::absolute(Duration::from_secs(secs))
    }

    /// [`CachePolicy::sliding`] in whole seconds
    pub fn sliding_secs(secs: u64) -> Self {
        Self::sliding(Duration::from_secs(secs))
    }

    /// Restrict the key to the named fields, in this order
    pub fn with_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        self.key_fields = fields.into_iter().collect();
        self
    }

    /// Store expiration for entries written under this policy
    pub fn expiration(&self) -> Expiration {
        if self.ttl.is_zero() {
            return Expiration::Never;
        }
        match self.kind {
            ExpirationKind::Absolute => Expiration::Absolute(self.ttl),
            ExpirationKind::Sliding => Expiration::Sliding(self.ttl),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Rendered value of one key field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    /// A single value
    Scalar(String),
    /// A sequence of values; `None` when absent
    Collection(Option<Vec<String>>),
}

/// One field a request exposes for key derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    /// Field name as it appears in the key
    pub name: &'static str,
    /// Current value
    pub value: KeyValue,
}

impl KeyField {
    /// A scalar field
    pub fn scalar(name: &'static str, value: &impl Display) -> Self {
        Self {
            name,
            value: KeyValue::Scalar(value.to_string()),
        }
    }

    /// An optional scalar field; `None` renders as an empty value
    pub fn optional<T: Display>(name: &'static str, value: Option<&T>) -> Self {
        Self {
            name,
            value: KeyValue::Scalar(value.map(|v| v.to_string()).unwrap_or_default()),
        }
    }

    /// A collection field
    pub fn collection<I>(name: &'static str, items: Option<I>) -> Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        Self {
            name,
            value: KeyValue::Collection(
                items.map(|items| items.into_iter().map(|i| i.to_string()).collect()),
            ),
        }
    }

    fn render(&self, out: &mut String) {
        match &self.value {
            KeyValue::Scalar(value) => {
                let _ = write!(out, "{}:{}", self.name, value);
            }
            KeyValue::Collection(Some(items)) if !items.is_empty() => {
                let _ = write!(out, "{}::{}", self.name, items.join(","));
            }
            KeyValue::Collection(_) => {
                let _ = write!(out, "{}::{}", self.name, NULL_MARKER);
            }
        }
    }
}

/// Check that every field the policy names is listed by the request.
///
/// Returns the resolved field names in key order. Unknown names are all
/// reported together.
pub fn resolve_fields(
    type_name: &str,
    policy: &CachePolicy,
    fields: &[KeyField],
) -> Result<Vec<&'static str>> {
    if policy.key_fields.is_empty() {
        return Ok(fields.iter().map(|f| f.name).collect());
    }
    let missing: Vec<String> = policy
        .key_fields
        .iter()
        .filter(|name| !fields.iter().any(|f| f.name == **name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingCacheFields {
            type_name: type_name.to_string(),
            missing,
        });
    }
    Ok(policy.key_fields.clone())
}

/// Derive the cache key for a request.
///
/// Pure: equal inputs always give equal keys. A disabled policy yields the
/// bare type name.
pub fn derive_key(type_name: &str, policy: &CachePolicy, fields: &[KeyField]) -> Result<String> {
    if !policy.enabled {
        return Ok(type_name.to_string());
    }
    let order = resolve_fields(type_name, policy, fields)?;
    let mut key = String::with_capacity(type_name.len() + order.len() * 12);
    key.push_str(type_name);
    for name in order {
        if let Some(field) = fields.iter().find(|f| f.name == name) {
            key.push('-');
            field.render(&mut key);
        }
    }
    Ok(key)
}
