//! One SQL statement and its per-call settings

use std::any::TypeId;
use std::fmt;
use std::time::Duration;

use quill_core::{DbError, Operation, Params, Value};

use crate::registry::{erase, HandlerFn};

/// A handler attached to a single call.
///
/// It runs before the global registry. When it handles the error the
/// registry is not consulted.
#[derive(Clone)]
pub struct ScopedHandler {
    type_id: TypeId,
    type_name: &'static str,
    handler: HandlerFn,
}

impl ScopedHandler {
    /// Handle provider errors of type `E`
    pub fn new<E, F>(handler: F) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            handler: erase(handler),
        }
    }

    /// Whether this handler matches the error's type and handles it
    pub fn handles(&self, operation: Operation, error: &DbError) -> bool {
        error.type_id() == self.type_id && (self.handler)(operation, error)
    }
}

impl fmt::Debug for ScopedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedHandler")
            .field("error_type", &self.type_name)
            .finish()
    }
}

/// SQL text plus parameters, timeout, entity label and scoped handler
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    params: Params,
    timeout: Option<Duration>,
    entity: Option<String>,
    handler: Option<ScopedHandler>,
}

impl Statement {
    /// A statement with no parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
            timeout: None,
            entity: None,
            handler: None,
        }
    }

    /// Bind one named parameter
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Add a set of parameters
    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    /// Statement timeout, overriding the configured default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Entity name used in not-found errors
    pub fn entity(mut self, name: impl Into<String>) -> Self {
        self.entity = Some(name.into());
        self
    }

    /// Attach a call-site handler for provider errors of type `E`
    pub fn handle<E, F>(mut self, handler: F) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        self.handler = Some(ScopedHandler::new::<E, F>(handler));
        self
    }

    /// SQL text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters
    pub fn parameters(&self) -> &Params {
        &self.params
    }

    /// Explicit timeout, if any
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// Entity label, if any
    pub fn entity_name(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    /// The call-site handler, if any
    pub fn scoped_handler(&self) -> Option<&ScopedHandler> {
        self.handler.as_ref()
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

impl From<&String> for Statement {
    fn from(sql: &String) -> Self {
        Statement::new(sql.as_str())
    }
}
