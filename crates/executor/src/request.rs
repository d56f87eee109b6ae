//! Request traits
//!
//! A request is a value holding its inputs plus the code that turns them
//! into a result through a [`SqlContext`]. Queries read, commands write;
//! the distinction only decides which executor accepts them.
//!
//! Caching is declared through [`Cacheable`], which both the synchronous
//! and the asynchronous request traits extend. Every method has a default,
//! so a request that does not cache needs only `impl Cacheable for T {}`.
//!
//! ```text
//! struct FindPersonById { id: i64 }
//!
//! impl Cacheable for FindPersonById {
//!     fn cache_policy(&self) -> CachePolicy {
//!         CachePolicy::absolute_secs(60).with_fields(["Id"])
//!     }
//!     fn key_fields(&self) -> Vec<KeyField> {
//!         vec![KeyField::scalar("Id", &self.id)]
//!     }
//! }
//!
//! impl Request for FindPersonById {
//!     type Output = Person;
//!     fn execute(&mut self, ctx: &SqlContext) -> Result<Person> {
//!         ctx.through(|| ctx.select_first(Statement::new(SQL).bind("id", self.id)))
//!     }
//! }
//! impl Query for FindPersonById {}
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use quill_cache::{derive_key, Cache, CachePolicy, KeyField};
use quill_core::{short_name, Result};

use crate::context::SqlContext;

/// Boxed future returned by asynchronous request bodies
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a request uses the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheUsage {
    /// Read through the cache, generating on a miss
    #[default]
    Full,
    /// Always generate, then store the fresh result
    WriteOnly,
    /// Never touch the cache
    Bypass,
}

/// Caching declaration of a request type
pub trait Cacheable {
    /// Declared policy; disabled unless overridden
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::disabled()
    }

    /// Fields that may contribute to the cache key
    fn key_fields(&self) -> Vec<KeyField> {
        Vec::new()
    }

    /// Whether the policy differs between instances of the type.
    ///
    /// Such policies are validated on every execution instead of once per
    /// type.
    fn instance_policy(&self) -> bool {
        false
    }

    /// Cache key for this instance.
    ///
    /// Override for a bespoke key; the default derives it from
    /// [`Cacheable::key_fields`].
    fn cache_key(&self, policy: &CachePolicy) -> Result<String> {
        derive_key(self.type_name(), policy, &self.key_fields())
    }

    /// Cache usage for this instance
    fn cache_usage(&self) -> CacheUsage {
        CacheUsage::Full
    }

    /// A store to use instead of the executor's shared one
    fn cache_store(&self) -> Option<Arc<dyn Cache>> {
        None
    }

    /// Full type path; identifies the type for policy resolution
    fn type_path(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Short type name used in keys and messages
    fn type_name(&self) -> &'static str {
        short_name(self.type_path())
    }
}

/// A synchronous request
pub trait Request: Cacheable + Send {
    /// Result of a successful execution
    type Output;

    /// Check inputs; an error here prevents `execute` from running
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Run the request's statements
    fn execute(&mut self, ctx: &SqlContext) -> Result<Self::Output>;
}

/// A read request, accepted by [`QueryExecutor`](crate::QueryExecutor)
pub trait Query: Request {}

/// A write request, accepted by [`CommandExecutor`](crate::CommandExecutor)
pub trait Command: Request {}

/// An asynchronous request.
///
/// The body may await user code; data-access calls on the context remain
/// synchronous. Validation and caching behave as for [`Request`].
pub trait AsyncRequest: Cacheable + Send {
    /// Result of a successful execution
    type Output: Send;

    /// Check inputs; an error here prevents `execute_async` from running
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Run the request's body
    fn execute_async<'a>(&'a mut self, ctx: &'a SqlContext) -> BoxFuture<'a, Result<Self::Output>>;
}

/// An asynchronous read request
pub trait AsyncQuery: AsyncRequest {}

/// An asynchronous write request
pub trait AsyncCommand: AsyncRequest {}

impl<R: Cacheable + ?Sized> Cacheable for Box<R> {
    fn cache_policy(&self) -> CachePolicy {
        (**self).cache_policy()
    }

    fn key_fields(&self) -> Vec<KeyField> {
        (**self).key_fields()
    }

    fn instance_policy(&self) -> bool {
        (**self).instance_policy()
    }

    fn cache_key(&self, policy: &CachePolicy) -> Result<String> {
        (**self).cache_key(policy)
    }

    fn cache_usage(&self) -> CacheUsage {
        (**self).cache_usage()
    }

    fn cache_store(&self) -> Option<Arc<dyn Cache>> {
        (**self).cache_store()
    }

    fn type_path(&self) -> &'static str {
        (**self).type_path()
    }

    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }
}

impl<R: Request + ?Sized> Request for Box<R> {
    type Output = R::Output;

    fn validate(&self) -> Result<()> {
        (**self).validate()
    }

    fn execute(&mut self, ctx: &SqlContext) -> Result<Self::Output> {
        (**self).execute(ctx)
    }
}

impl<Q: Query + ?Sized> Query for Box<Q> {}

impl<C: Command + ?Sized> Command for Box<C> {}

#[cfg(test)]
mod tests {
    use super::*;

    struct FindPersonById {
        id: i64,
    }

    impl Cacheable for FindPersonById {
        fn cache_policy(&self) -> CachePolicy {
            CachePolicy::absolute_secs(60).with_fields(["Id"])
        }

        fn key_fields(&self) -> Vec<KeyField> {
            vec![KeyField::scalar("Id", &self.id)]
        }
    }

    struct Plain;

    impl Cacheable for Plain {}

    #[test]
    fn test_default_key_derivation() {
        let request = FindPersonById { id: 5 };
        assert_eq!(request.type_name(), "FindPersonById");
        assert_eq!(
            request.cache_key(&request.cache_policy()).unwrap(),
            "FindPersonById-Id:5"
        );
    }

    #[test]
    fn test_defaults() {
        let request = Plain;
        assert!(!request.cache_policy().enabled);
        assert_eq!(request.cache_usage(), CacheUsage::Full);
        assert!(request.cache_store().is_none());
        assert_eq!(request.cache_key(&request.cache_policy()).unwrap(), "Plain");
    }

    #[test]
    fn test_box_forwards_identity() {
        let boxed: Box<dyn Cacheable> = Box::new(FindPersonById { id: 6 });
        assert_eq!(boxed.type_name(), "FindPersonById");
        assert!(boxed.type_path().ends_with("FindPersonById"));
        assert_eq!(
            boxed.cache_key(&boxed.cache_policy()).unwrap(),
            "FindPersonById-Id:6"
        );
    }
}
