//! # Quill Executor
//!
//! Query/command execution over a relational database.
//!
//! This crate provides:
//! - [`QueryExecutor`] / [`CommandExecutor`]: validate-then-execute with caching
//! - [`SqlContext`]: the data-access surface handed to request bodies
//! - [`ExceptionHandlerRegistry`]: type-indexed provider error handlers
//! - [`Setup`] / [`Configuration`]: one-time wiring and `quill.toml` settings
//! - Helper requests for single-statement patterns
//!
//! ## Quick Start
//!
//! ```text
//! use quill_executor::*;
//!
//! let config = Setup::new()
//!     .connection_factory(SqliteConnectionFactory::file("app.db"))
//!     .build();
//!
//! let commands = CommandExecutor::new(Arc::clone(&config));
//! commands.execute(&mut DdlCommand::new("CREATE TABLE person (Id INTEGER, Name TEXT)"))?;
//! commands.execute(&mut InsertCommand::new(
//!     Statement::new("INSERT INTO person VALUES (:id, :name)").bind("id", 1).bind("name", "Ada"),
//! ))?;
//!
//! let people: Vec<Person> = commands
//!     .queries()
//!     .execute(&mut SelectQuery::new("SELECT Id, Name FROM person"))?;
//! ```
//!
//! ## Error handling
//!
//! | Failure | Result |
//! |---------|--------|
//! | `validate()` fails | that error; `execute()` never runs |
//! | provider error, handled | default / empty value |
//! | provider error, unhandled | `Error::Provider` with the original error |
//! | single-row select, no rows | `Error::EntityNotFound` |
//! | no connection factory | `Error::Configuration` |

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod context;
mod executor;
mod policy;
mod registry;
mod request;
mod requests;
mod setup;
mod statement;

// =============================================================================
// Public API
// =============================================================================

pub use config::{CacheSettings, QuillConfig, CONFIG_FILE_NAME};
pub use context::{Grid, SqlContext};
pub use executor::{CommandExecutor, QueryExecutor};
pub use registry::{ExceptionHandlerRegistry, HandlerFn, HandlerId};
pub use request::{
    AsyncCommand, AsyncQuery, AsyncRequest, BoxFuture, CacheUsage, Cacheable, Command, Query,
    Request,
};
pub use requests::{
    DdlCommand, DeleteCommand, InsertCommand, SelectFirstQuery, SelectQuery, UpdateCommand,
};
pub use setup::{Configuration, Entity, Setup};
pub use statement::{ScopedHandler, Statement};

// Lower layers
pub use quill_cache::{
    derive_key, Cache, CacheExt, CachePolicy, CacheStats, CacheValue, Expiration, ExpirationKind,
    KeyField, KeyValue, MemoryCache, NoCache,
};
pub use quill_core::{
    short_type_name, ColumnMap, Connection, ConnectionFactory, DbError, DbResult, Error, Operation,
    Params, RequestInfo, Result, ResultSet, Row, Segment, Value,
};
#[cfg(feature = "sqlite")]
pub use quill_core::{SqliteConnection, SqliteConnectionFactory};
pub use quill_transaction::{
    ticks_to_seconds, ticks_to_timeout, timeout_to_ticks, AmbientContext, Enlistment,
    IsolationLevel, ScopeOption, Transaction, TransactionCoordinator, TransactionMetrics,
    TransactionScope, TransactionStatus,
};
