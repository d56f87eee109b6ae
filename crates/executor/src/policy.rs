//! Per-type cache policy resolution
//!
//! A request type's policy is read and validated the first time that type
//! is executed, then reused. Validation checks every declared key field
//! against the fields the request lists, so a misspelled field fails the
//! first execution instead of silently producing shared keys.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use quill_cache::{resolve_fields, CachePolicy};
use quill_core::Result;

use crate::request::Cacheable;

pub(crate) struct PolicyCache {
    resolved: DashMap<&'static str, Arc<CachePolicy>>,
}

impl PolicyCache {
    pub(crate) fn new() -> Self {
        Self {
            resolved: DashMap::new(),
        }
    }

    /// Policy for the request's type, validated on first use.
    ///
    /// Failures are not remembered; every execution of a misconfigured type
    /// fails the same way.
    pub(crate) fn resolve<R: Cacheable + ?Sized>(&self, request: &R) -> Result<Arc<CachePolicy>> {
        let type_path = request.type_path();
        if request.instance_policy() {
            return Self::validate(request).map(Arc::new);
        }
        if let Some(policy) = self.resolved.get(type_path) {
            return Ok(Arc::clone(policy.value()));
        }
        let policy = Self::validate(request)?;
        debug!(
            target: "quill::cache",
            request = request.type_name(),
            enabled = policy.enabled,
            ttl = ?policy.ttl,
            "Cache policy resolved"
        );
        let policy = Arc::new(policy);
        self.resolved.insert(type_path, Arc::clone(&policy));
        Ok(policy)
    }

    fn validate<R: Cacheable + ?Sized>(request: &R) -> Result<CachePolicy> {
        let policy = request.cache_policy();
        if policy.enabled {
            resolve_fields(request.type_name(), &policy, &request.key_fields())?;
        }
        Ok(policy)
    }

    pub(crate) fn clear(&self) {
        self.resolved.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.resolved.len()
    }
}
