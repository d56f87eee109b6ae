//! The SQL execution core handed to request bodies
//!
//! Every data-access call on [`SqlContext`] follows the same steps:
//!
//! ```text
//! factory.create_for(request) ─> open ─> one logical operation ─> close
//!                                              │
//!                                   error ─────┴─> scoped handler?
//!                                                    └─> global registry (exact type, operation)
//!                                                          handled   -> default / empty result
//!                                                          unhandled -> Error::Provider(original)
//! ```
//!
//! The connection is closed on every path before the error is offered to
//! the handlers. "Entity does not exist" is not a provider error and never
//! reaches the handlers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use quill_cache::{Cache, CacheExt, CachePolicy};
use quill_core::{
    short_type_name, Connection, DbError, DbResult, Error, Operation, Params, RequestInfo, Result,
    ResultSet,
};
use quill_transaction::{AmbientContext, Transaction};

use crate::executor::{CommandExecutor, QueryExecutor, Runtime};
use crate::request::CacheUsage;
use crate::setup::Configuration;
use crate::statement::Statement;

struct ConnectionGuard {
    conn: Box<dyn Connection>,
}

impl ConnectionGuard {
    fn open(conn: Box<dyn Connection>) -> DbResult<Self> {
        let mut guard = Self { conn };
        if !guard.conn.is_open() {
            guard.conn.open()?;
        }
        Ok(guard)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.conn.close() {
            warn!(target: "quill::sql", error = %e, "Failed to close connection");
        }
    }
}

/// Result sets of a multi-statement batch, read in order
pub struct Grid<'a> {
    sets: std::vec::IntoIter<ResultSet>,
    config: &'a Configuration,
}

impl<'a> Grid<'a> {
    fn next_set(&mut self) -> Result<ResultSet> {
        self.sets
            .next()
            .ok_or_else(|| Error::configuration("read past the last result set of the batch"))
    }

    /// Map the next result set to `T`
    pub fn read<T: DeserializeOwned + 'static>(&mut self) -> Result<Vec<T>> {
        let set = self.next_set()?;
        set.to_entities(self.config.mapping::<T>().as_deref())
    }

    /// First row of the next result set, if it has any
    pub fn read_first<T: DeserializeOwned + 'static>(&mut self) -> Result<Option<T>> {
        let set = self.next_set()?;
        match set.rows.first() {
            Some(row) => row.to_entity(self.config.mapping::<T>().as_deref()).map(Some),
            None => Ok(None),
        }
    }

    /// Result sets not read yet
    pub fn remaining(&self) -> usize {
        self.sets.len()
    }
}

/// Data access, caching and transaction access for one request execution
pub struct SqlContext {
    runtime: Runtime,
    cache: Arc<dyn Cache>,
    policy: Arc<CachePolicy>,
    cache_key: Option<String>,
    usage: CacheUsage,
    type_name: &'static str,
}

impl SqlContext {
    pub(crate) fn new(
        runtime: Runtime,
        cache: Arc<dyn Cache>,
        policy: Arc<CachePolicy>,
        cache_key: Option<String>,
        usage: CacheUsage,
        type_name: &'static str,
    ) -> Self {
        Self {
            runtime,
            cache,
            policy,
            cache_key,
            usage,
            type_name,
        }
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    /// Query executor sharing this execution's configuration and ambient context
    pub fn queries(&self) -> QueryExecutor {
        QueryExecutor::from_runtime(self.runtime.clone())
    }

    /// Command executor sharing this execution's configuration and ambient context
    pub fn commands(&self) -> CommandExecutor {
        CommandExecutor::from_runtime(self.runtime.clone())
    }

    /// Cache store used by this request
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Resolved cache policy of the request type
    pub fn cache_policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Derived cache key; `None` when the request type caches nothing.
    ///
    /// Present under [`CacheUsage::Bypass`] too, so a bypassing request can
    /// still [`invalidate`](SqlContext::invalidate) a stale entry.
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    /// The ambient transaction context
    pub fn ambient(&self) -> &AmbientContext {
        &self.runtime.ambient
    }

    /// The ambient transaction, if any
    pub fn transaction(&self) -> Option<Transaction> {
        self.runtime.ambient.current()
    }

    /// The ambient transaction, or `TransactionRequired`
    pub fn require_transaction(&self) -> Result<Transaction> {
        self.runtime.ambient.require_transaction()
    }

    /// Whether detailed not-found messages are enabled
    pub fn debug_messages(&self) -> bool {
        self.runtime.config.debug_messages()
    }

    /// Short type name of the executing request
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    // ========================================================================
    // Through-cache
    // ========================================================================

    /// Produce a result through the cache according to the request's
    /// cache usage.
    ///
    /// - `Bypass`, or no enabled policy: run `generate`
    /// - `WriteOnly`: run `generate`, store the result
    /// - `Full`: return the cached value or generate-and-store it
    pub fn through<T, F>(&self, generate: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        let key = match (&self.cache_key, self.usage) {
            (Some(key), CacheUsage::Full | CacheUsage::WriteOnly) => key,
            _ => return generate(),
        };
        let expiration = self.policy.expiration();
        if self.usage == CacheUsage::WriteOnly {
            let value = generate()?;
            self.cache.set_value(key, value.clone(), expiration);
            trace!(target: "quill::cache", key = key.as_str(), "Cache entry written");
            return Ok(value);
        }
        self.cache.get_or_set(key, expiration, generate)
    }

    /// Asynchronous [`SqlContext::through`].
    ///
    /// No lock is held while `generate` runs, so concurrent misses on one
    /// key may each generate; the last one stored wins.
    pub async fn through_async<T, F, Fut>(&self, generate: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = match (&self.cache_key, self.usage) {
            (Some(key), CacheUsage::Full | CacheUsage::WriteOnly) => key.clone(),
            _ => return generate().await,
        };
        if self.usage == CacheUsage::Full {
            if let Some(value) = self.cache.get_as::<T>(&key) {
                return Ok(value);
            }
        }
        let value = generate().await?;
        self.cache
            .set_value(&key, value.clone(), self.policy.expiration());
        Ok(value)
    }

    /// Remove this request's cache entry; returns whether one existed
    pub fn invalidate(&self) -> bool {
        match &self.cache_key {
            Some(key) => {
                debug!(target: "quill::cache", key = key.as_str(), "Cache entry invalidated");
                self.cache.remove(key)
            }
            None => false,
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// First row mapped to `T`.
    ///
    /// Zero rows is `EntityNotFound`; a handled provider error returns
    /// `T::default()`.
    pub fn select_first<T>(&self, stmt: impl Into<Statement>) -> Result<T>
    where
        T: DeserializeOwned + Default + 'static,
    {
        self.first_of(Operation::Select, stmt.into())
    }

    /// Every row mapped to `T`; a handled provider error returns an empty list
    pub fn select_many<T>(&self, stmt: impl Into<Statement>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        self.list_of(Operation::Select, stmt.into())
    }

    /// Rows split at `split_on` into two entities
    pub fn select_multi2<A, B>(&self, stmt: impl Into<Statement>, split_on: &str) -> Result<Vec<(A, B)>>
    where
        A: DeserializeOwned + 'static,
        B: DeserializeOwned + 'static,
    {
        let Some(set) = self.fetch(Operation::Select, &stmt.into())? else {
            return Ok(Vec::new());
        };
        let (ma, mb) = (self.mapping::<A>(), self.mapping::<B>());
        set.rows
            .iter()
            .map(|row| {
                let parts = row.split(&[split_on])?;
                Ok((
                    parts[0].to_entity(ma.as_deref())?,
                    parts[1].to_entity(mb.as_deref())?,
                ))
            })
            .collect()
    }

    /// Rows split at the two `split_on` columns into three entities
    pub fn select_multi3<A, B, C>(
        &self,
        stmt: impl Into<Statement>,
        split_on: [&str; 2],
    ) -> Result<Vec<(A, B, C)>>
    where
        A: DeserializeOwned + 'static,
        B: DeserializeOwned + 'static,
        C: DeserializeOwned + 'static,
    {
        let Some(set) = self.fetch(Operation::Select, &stmt.into())? else {
            return Ok(Vec::new());
        };
        let (ma, mb, mc) = (self.mapping::<A>(), self.mapping::<B>(), self.mapping::<C>());
        set.rows
            .iter()
            .map(|row| {
                let parts = row.split(&split_on)?;
                Ok((
                    parts[0].to_entity(ma.as_deref())?,
                    parts[1].to_entity(mb.as_deref())?,
                    parts[2].to_entity(mc.as_deref())?,
                ))
            })
            .collect()
    }

    /// Run a multi-statement batch and read its result sets through `read`.
    ///
    /// A handled provider error returns `R::default()` without calling `read`.
    pub fn select_grid<R, F>(&self, stmt: impl Into<Statement>, read: F) -> Result<R>
    where
        R: Default,
        F: FnOnce(&mut Grid<'_>) -> Result<R>,
    {
        let stmt = stmt.into();
        let sets = self.run(Operation::Select, &stmt, |conn, sql, params, timeout| {
            conn.query_multiple(sql, params, timeout)
        })?;
        match sets {
            Some(sets) => {
                let mut grid = Grid {
                    sets: sets.into_iter(),
                    config: &self.runtime.config,
                };
                read(&mut grid)
            }
            None => Ok(R::default()),
        }
    }

    /// Parents with their children, from rows of `parent columns | child columns`.
    ///
    /// Rows are grouped by `parent_key` in first-seen order; child segments
    /// that are entirely NULL (outer-join misses) are skipped.
    pub fn select_one_to_many<P, C, K, F, G>(
        &self,
        stmt: impl Into<Statement>,
        split_on: &str,
        parent_key: F,
        mut attach: G,
    ) -> Result<Vec<P>>
    where
        P: DeserializeOwned + 'static,
        C: DeserializeOwned + 'static,
        K: Eq + Hash,
        F: Fn(&P) -> K,
        G: FnMut(&mut P, C),
    {
        let Some(set) = self.fetch(Operation::Select, &stmt.into())? else {
            return Ok(Vec::new());
        };
        let (mp, mc) = (self.mapping::<P>(), self.mapping::<C>());
        let mut parents: Vec<P> = Vec::new();
        let mut index: HashMap<K, usize> = HashMap::new();
        for row in &set.rows {
            let parts = row.split(&[split_on])?;
            let parent: P = parts[0].to_entity(mp.as_deref())?;
            let key = parent_key(&parent);
            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    index.insert(key, parents.len());
                    parents.push(parent);
                    parents.len() - 1
                }
            };
            if !parts[1].is_null() {
                attach(&mut parents[slot], parts[1].to_entity(mc.as_deref())?);
            }
        }
        Ok(parents)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Run an INSERT; returns affected rows (0 when a handler suppressed the error)
    pub fn execute_insert(&self, stmt: impl Into<Statement>) -> Result<u64> {
        self.affected(Operation::Insert, stmt.into())
    }

    /// Run an UPDATE; returns affected rows (0 when a handler suppressed the error)
    pub fn execute_update(&self, stmt: impl Into<Statement>) -> Result<u64> {
        self.affected(Operation::Update, stmt.into())
    }

    /// Run a DELETE; returns affected rows (0 when a handler suppressed the error)
    pub fn execute_delete(&self, stmt: impl Into<Statement>) -> Result<u64> {
        self.affected(Operation::Delete, stmt.into())
    }

    /// Run a schema statement
    pub fn execute_ddl(&self, stmt: impl Into<Statement>) -> Result<()> {
        self.affected(Operation::Ddl, stmt.into()).map(|_| ())
    }

    /// INSERT returning rows (`RETURNING`, or a trailing SELECT); first row
    pub fn insert_get_first<T>(&self, stmt: impl Into<Statement>) -> Result<T>
    where
        T: DeserializeOwned + Default + 'static,
    {
        self.first_of(Operation::Insert, stmt.into())
    }

    /// INSERT returning rows; every row
    pub fn insert_get_list<T>(&self, stmt: impl Into<Statement>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        self.list_of(Operation::Insert, stmt.into())
    }

    /// UPDATE returning rows; first row
    pub fn update_get_first<T>(&self, stmt: impl Into<Statement>) -> Result<T>
    where
        T: DeserializeOwned + Default + 'static,
    {
        self.first_of(Operation::Update, stmt.into())
    }

    /// UPDATE returning rows; every row
    pub fn update_get_list<T>(&self, stmt: impl Into<Statement>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        self.list_of(Operation::Update, stmt.into())
    }

    /// DELETE returning rows; first row
    pub fn delete_get_first<T>(&self, stmt: impl Into<Statement>) -> Result<T>
    where
        T: DeserializeOwned + Default + 'static,
    {
        self.first_of(Operation::Delete, stmt.into())
    }

    /// DELETE returning rows; every row
    pub fn delete_get_list<T>(&self, stmt: impl Into<Statement>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        self.list_of(Operation::Delete, stmt.into())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn mapping<T: 'static>(&self) -> Option<Arc<quill_core::ColumnMap>> {
        self.runtime.config.mapping::<T>()
    }

    fn first_of<T>(&self, operation: Operation, stmt: Statement) -> Result<T>
    where
        T: DeserializeOwned + Default + 'static,
    {
        let Some(set) = self.fetch(operation, &stmt)? else {
            return Ok(T::default());
        };
        match set.rows.first() {
            Some(row) => row.to_entity(self.mapping::<T>().as_deref()),
            None => Err(self.not_found::<T>(&stmt)),
        }
    }

    fn list_of<T>(&self, operation: Operation, stmt: Statement) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        match self.fetch(operation, &stmt)? {
            Some(set) => set.to_entities(self.mapping::<T>().as_deref()),
            None => Ok(Vec::new()),
        }
    }

    fn affected(&self, operation: Operation, stmt: Statement) -> Result<u64> {
        let affected = self.run(operation, &stmt, |conn, sql, params, timeout| {
            conn.execute(sql, params, timeout)
        })?;
        Ok(affected.unwrap_or(0))
    }

    // Selects run as one statement; writes may be a batch whose last
    // result set carries the returned rows.
    fn fetch(&self, operation: Operation, stmt: &Statement) -> Result<Option<ResultSet>> {
        self.run(operation, stmt, |conn, sql, params, timeout| {
            if operation == Operation::Select {
                conn.query(sql, params, timeout)
            } else {
                conn.query_multiple(sql, params, timeout)
                    .map(|mut sets| sets.pop().unwrap_or_default())
            }
        })
    }

    fn not_found<T>(&self, stmt: &Statement) -> Error {
        let entity = stmt
            .entity_name()
            .map(str::to_string)
            .unwrap_or_else(|| stmt.sql().to_string());
        let name = stmt.entity_name().unwrap_or_else(|| short_type_name::<T>());
        let message = if self.debug_messages() {
            format!(
                "{} does not exist: no row returned by `{}` with parameters {}",
                name,
                stmt.sql(),
                stmt.parameters().to_json()
            )
        } else {
            format!("{} does not exist", name)
        };
        Error::EntityNotFound { entity, message }
    }

    /// Run one logical operation on a fresh connection.
    ///
    /// `Ok(None)` means a handler suppressed the provider error.
    fn run<T, F>(&self, operation: Operation, stmt: &Statement, call: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Box<dyn Connection>, &str, &Params, Option<Duration>) -> DbResult<T>,
    {
        let config = &self.runtime.config;
        let factory = config.connection_factory()?;
        let info = RequestInfo::new(self.type_name, operation);
        let timeout = stmt.timeout_override().or_else(|| config.command_timeout());

        trace!(
            target: "quill::sql",
            request = self.type_name,
            %operation,
            sql = stmt.sql(),
            "Executing statement"
        );
        let outcome = (|| -> DbResult<T> {
            let mut guard = ConnectionGuard::open(factory.create_for(&info)?)?;
            let started = Instant::now();
            let result = call(&mut guard.conn, stmt.sql(), stmt.parameters(), timeout);
            let elapsed = started.elapsed();
            if elapsed >= config.slow_statement_threshold() {
                warn!(
                    target: "quill::sql",
                    request = self.type_name,
                    %operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    sql = stmt.sql(),
                    "Slow statement"
                );
            }
            result
        })();

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(error) => self.intercept(operation, stmt, error).map(|()| None),
        }
    }

    fn intercept(&self, operation: Operation, stmt: &Statement, error: DbError) -> Result<()> {
        if let Some(handler) = stmt.scoped_handler() {
            if handler.handles(operation, &error) {
                debug!(
                    target: "quill::handlers",
                    request = self.type_name,
                    %operation,
                    error_type = error.type_name(),
                    "Provider error handled by scoped handler"
                );
                return Ok(());
            }
        }
        if self.runtime.config.handlers().dispatch(operation, &error) {
            return Ok(());
        }
        debug!(
            target: "quill::sql",
            request = self.type_name,
            %operation,
            error = %error,
            "Provider error propagated"
        );
        Err(Error::Provider(error))
    }
}

impl fmt::Debug for SqlContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlContext")
            .field("request", &self.type_name)
            .field("cache_key", &self.cache_key)
            .field("usage", &self.usage)
            .finish()
    }
}
