//! Error types for Quill
//!
//! All failures surfaced by the executors are represented by [`Error`]. The
//! taxonomy follows how callers are expected to react:
//!
//! | Category | Variants | Reaction |
//! |----------|----------|----------|
//! | Configuration | `Configuration`, `MissingCacheFields`, `TransactionRequired` | fatal, fix the setup |
//! | Not found | `EntityNotFound` | single-row selection returned nothing |
//! | Validation | `Validation` | raised by `validate()`, never suppressed |
//! | Provider | `Provider` | original driver error, passed through unchanged |
//! | Transaction | `TransactionAborted`, `TransactionTimeout`, `InvalidScope` | scope outcome |
//! | System | `Internal` | bug or invariant violation |
//!
//! Provider errors are carried as [`DbError`], which remembers the concrete
//! error type so exception handlers can be keyed by it.

use std::any::TypeId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Quill operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Quill
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing setup (no connection factory, bad policy, ...)
    #[error("configuration error: {reason}")]
    Configuration {
        /// What is misconfigured
        reason: String,
    },

    /// A cache policy names key fields the request type does not expose
    #[error("cache key fields not found on {type_name}: {}", missing.join(", "))]
    MissingCacheFields {
        /// Request type name
        type_name: String,
        /// Every declared field name that could not be resolved
        missing: Vec<String>,
    },

    /// A single-row selection returned zero rows
    #[error("{message}")]
    EntityNotFound {
        /// Entity type name, or the raw SQL when no entity name is known
        entity: String,
        /// Human-readable message; detailed only when debug messages are enabled
        message: String,
    },

    /// Request validation failed
    #[error("validation failed: {reason}")]
    Validation {
        /// Why the request is invalid
        reason: String,
    },

    /// Error raised by the database provider, passed through verbatim
    #[error(transparent)]
    Provider(#[from] DbError),

    /// An operation needed an ambient transaction and none was active
    #[error("an ambient transaction is required but none is active")]
    TransactionRequired,

    /// The transaction was rolled back instead of committed
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Why the transaction did not commit
        reason: String,
    },

    /// The transaction outlived its timeout
    #[error("transaction timed out after {timeout:?}")]
    TransactionTimeout {
        /// Configured timeout
        timeout: Duration,
    },

    /// Scope used in a way its lifecycle does not allow
    #[error("invalid transaction scope: {reason}")]
    InvalidScope {
        /// What was attempted
        reason: String,
    },

    /// Internal error (bug or invariant violation)
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the broken invariant
        reason: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// Returns the provider error if this is one
    pub fn as_provider(&self) -> Option<&DbError> {
        match self {
            Error::Provider(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this is an `EntityNotFound` error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::EntityNotFound { .. })
    }
}

/// A database provider error tagged with its concrete type.
///
/// The SQL execution primitive reports failures as `DbError`. The concrete
/// error type is captured at construction, which is what exception handlers
/// are registered against: a handler for `E` fires only for a `DbError`
/// built from an `E`.
pub struct DbError {
    inner: Box<dyn std::error::Error + Send + Sync + 'static>,
    type_id: TypeId,
    type_name: &'static str,
}

impl DbError {
    /// Wrap a concrete provider error
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
        }
    }

    /// `TypeId` of the wrapped error
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the wrapped error
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the wrapped error is an `E`
    pub fn is<E: std::error::Error + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Borrow the wrapped error as `E`
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Borrow the wrapped error
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }

    /// Unwrap into the boxed provider error
    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.inner
    }
}

impl fmt::Debug for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbError")
            .field("type", &self.type_name)
            .field("error", &self.inner)
            .finish()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}
