//! Collaborator traits consumed by the execution core
//!
//! The core never talks to a database driver directly. It acquires a
//! [`Connection`] from a [`ConnectionFactory`] per data-access call and
//! drives it through these methods. Failures are reported as [`DbError`] so
//! the exception pipeline can dispatch on their concrete type.

use std::time::Duration;

use crate::error::DbError;
use crate::row::{Params, ResultSet};
use crate::types::RequestInfo;

/// Result of a provider call
pub type DbResult<T> = std::result::Result<T, DbError>;

/// A database connection handle.
///
/// Connections are used by one call at a time and are not required to be
/// `Sync`.
pub trait Connection: Send {
    /// Whether the connection is open
    fn is_open(&self) -> bool;

    /// Open the connection
    fn open(&mut self) -> DbResult<()>;

    /// Close the connection; must be idempotent
    fn close(&mut self) -> DbResult<()>;

    /// Run a row-returning statement
    fn query(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<ResultSet>;

    /// Run a batch that returns several result sets, in statement order
    fn query_multiple(
        &mut self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> DbResult<Vec<ResultSet>>;

    /// Run a statement and return the affected row count
    fn execute(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<u64>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn open(&mut self) -> DbResult<()> {
        (**self).open()
    }

    fn close(&mut self) -> DbResult<()> {
        (**self).close()
    }

    fn query(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<ResultSet> {
        (**self).query(sql, params, timeout)
    }

    fn query_multiple(
        &mut self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> DbResult<Vec<ResultSet>> {
        (**self).query_multiple(sql, params, timeout)
    }

    fn execute(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<u64> {
        (**self).execute(sql, params, timeout)
    }
}

/// Produces connections for data-access calls
pub trait ConnectionFactory: Send + Sync {
    /// Create a new, not necessarily open, connection
    fn create(&self) -> DbResult<Box<dyn Connection>>;

    /// Create a connection for a specific request.
    ///
    /// Factories that route request types to different databases override
    /// this; the default ignores the request.
    fn create_for(&self, request: &RequestInfo) -> DbResult<Box<dyn Connection>> {
        let _ = request;
        self.create()
    }
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> DbResult<Box<dyn Connection>> + Send + Sync,
{
    fn create(&self) -> DbResult<Box<dyn Connection>> {
        self()
    }
}
