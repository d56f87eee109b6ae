//! Query and command executors
//!
//! Executors wire a request to its collaborators and run it:
//!
//! ```text
//! execute(request)
//!   1. request.validate()          error -> returned, execute never runs
//!   2. resolve cache policy        first use per type, validates key fields
//!   3. derive cache key            only for an enabled policy
//!   4. build SqlContext            cache: request's own store, else the shared one
//!   5. request.execute(&ctx)
//! ```
//!
//! Executors are cheap to clone and hold no per-request state. Both kinds
//! share the same [`Configuration`], cache store and ambient transaction
//! context, and each can hand out the other ([`QueryExecutor::commands`],
//! [`CommandExecutor::queries`]).
//!
//! # Thread Safety
//!
//! Executors are `Send + Sync`. Clones share one ambient context, so code
//! running on another thread should use an executor built with
//! [`AmbientContext::detached`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use quill_cache::Cache;
use quill_core::Result;
use quill_transaction::AmbientContext;

use crate::context::SqlContext;
use crate::request::{AsyncCommand, AsyncQuery, AsyncRequest, Cacheable, Command, Query, Request};
use crate::setup::Configuration;

/// What every executor carries
#[derive(Clone)]
pub(crate) struct Runtime {
    pub(crate) config: Arc<Configuration>,
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) ambient: AmbientContext,
}

impl Runtime {
    fn new(config: Arc<Configuration>) -> Self {
        let cache = config.cache();
        let ambient = config.new_ambient();
        Self {
            config,
            cache,
            ambient,
        }
    }

    fn prepare<R: Cacheable + ?Sized>(&self, request: &R) -> Result<SqlContext> {
        let policy = self.config.policies.resolve(request)?;
        let usage = request.cache_usage();
        let cache_key = if policy.enabled {
            Some(request.cache_key(&policy)?)
        } else {
            None
        };
        let cache = request
            .cache_store()
            .unwrap_or_else(|| Arc::clone(&self.cache));
        Ok(SqlContext::new(
            self.clone(),
            cache,
            policy,
            cache_key,
            usage,
            request.type_name(),
        ))
    }

    fn run<R: Request + ?Sized>(&self, kind: &'static str, request: &mut R) -> Result<R::Output> {
        let type_name = request.type_name();
        if let Err(e) = request.validate() {
            debug!(target: "quill::executor", kind, request = type_name, error = %e, "Validation failed");
            return Err(e);
        }
        let ctx = self.prepare(&*request)?;
        trace!(target: "quill::executor", kind, request = type_name, cache_key = ?ctx.cache_key(), "Executing");
        let started = Instant::now();
        let result = request.execute(&ctx);
        debug!(
            target: "quill::executor",
            kind,
            request = type_name,
            ok = result.is_ok(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Executed"
        );
        result
    }

    async fn run_async<R: AsyncRequest + ?Sized>(
        &self,
        kind: &'static str,
        request: &mut R,
    ) -> Result<R::Output> {
        let type_name = request.type_name();
        if let Err(e) = request.validate() {
            debug!(target: "quill::executor", kind, request = type_name, error = %e, "Validation failed");
            return Err(e);
        }
        let ctx = self.prepare(&*request)?;
        let started = Instant::now();
        let result = request.execute_async(&ctx).await;
        debug!(
            target: "quill::executor",
            kind,
            request = type_name,
            ok = result.is_ok(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Executed"
        );
        result
    }

    fn run_all<'r, R, I>(&self, kind: &'static str, requests: I) -> Result<Vec<R::Output>>
    where
        R: Request + ?Sized + 'r,
        I: IntoIterator<Item = &'r mut R>,
    {
        let mut outputs = Vec::new();
        for (index, request) in requests.into_iter().enumerate() {
            match self.run(kind, request) {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    debug!(target: "quill::executor", kind, index, error = %e, "Batch stopped");
                    return Err(e);
                }
            }
        }
        Ok(outputs)
    }
}

macro_rules! executor_accessors {
    ($name:ident) => {
        impl $name {
            /// Create an executor with the configuration's shared cache and
            /// a fresh ambient context.
            pub fn new(config: Arc<Configuration>) -> Self {
                Self::from_runtime(Runtime::new(config))
            }

            pub(crate) fn from_runtime(runtime: Runtime) -> Self {
                Self { runtime }
            }

            /// Use `cache` as the shared store
            pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
                self.runtime.cache = cache;
                self
            }

            /// Run inside `ambient` instead of a fresh context
            pub fn with_ambient(mut self, ambient: AmbientContext) -> Self {
                self.runtime.ambient = ambient;
                self
            }

            /// The configuration
            pub fn config(&self) -> &Arc<Configuration> {
                &self.runtime.config
            }

            /// The shared cache store
            pub fn cache(&self) -> &Arc<dyn Cache> {
                &self.runtime.cache
            }

            /// The ambient transaction context
            pub fn ambient(&self) -> &AmbientContext {
                &self.runtime.ambient
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("config", &self.runtime.config)
                    .field("ambient", &self.runtime.ambient)
                    .finish()
            }
        }
    };
}

/// Runs [`Query`] requests
#[derive(Clone)]
pub struct QueryExecutor {
    runtime: Runtime,
}

executor_accessors!(QueryExecutor);

impl QueryExecutor {
    /// Validate, then execute one query
    pub fn execute<Q: Query + ?Sized>(&self, query: &mut Q) -> Result<Q::Output> {
        self.runtime.run("query", query)
    }

    /// Execute queries in order, stopping at the first error
    pub fn execute_all<'r, Q, I>(&self, queries: I) -> Result<Vec<Q::Output>>
    where
        Q: Query + ?Sized + 'r,
        I: IntoIterator<Item = &'r mut Q>,
    {
        self.runtime.run_all("query", queries)
    }

    /// Validate, then execute one asynchronous query
    pub async fn execute_async<Q: AsyncQuery + ?Sized>(&self, query: &mut Q) -> Result<Q::Output> {
        self.runtime.run_async("query", query).await
    }

    /// A command executor sharing this executor's state
    pub fn commands(&self) -> CommandExecutor {
        CommandExecutor::from_runtime(self.runtime.clone())
    }
}

/// Runs [`Command`] requests
#[derive(Clone)]
pub struct CommandExecutor {
    runtime: Runtime,
}

executor_accessors!(CommandExecutor);

impl CommandExecutor {
    /// Validate, then execute one command
    pub fn execute<C: Command + ?Sized>(&self, command: &mut C) -> Result<C::Output> {
        self.runtime.run("command", command)
    }

    /// Execute commands in order, stopping at the first error
    pub fn execute_all<'r, C, I>(&self, commands: I) -> Result<Vec<C::Output>>
    where
        C: Command + ?Sized + 'r,
        I: IntoIterator<Item = &'r mut C>,
    {
        self.runtime.run_all("command", commands)
    }

    /// Validate, then execute one asynchronous command
    pub async fn execute_async<C: AsyncCommand + ?Sized>(
        &self,
        command: &mut C,
    ) -> Result<C::Output> {
        self.runtime.run_async("command", command).await
    }

    /// A query executor sharing this executor's state
    pub fn queries(&self) -> QueryExecutor {
        QueryExecutor::from_runtime(self.runtime.clone())
    }
}
