//! Quill - query/command execution for relational databases
//!
//! Quill runs typed requests against a relational database: queries read,
//! commands write. Every execution follows one pipeline (validate, resolve
//! the cache policy, derive the key, execute) and every data-access call
//! opens its own connection and closes it on every path.
//!
//! # Quick Start
//!
//! ```ignore
//! use quill::*;
//!
//! let config = Setup::new()
//!     .connection_factory(SqliteConnectionFactory::file("app.db"))
//!     .exception_handler_for::<rusqlite::Error, _>(Operation::Insert, |_, e| is_duplicate(e))
//!     .build();
//!
//! let commands = CommandExecutor::new(Arc::clone(&config));
//! commands.execute(&mut InsertCommand::new(
//!     Statement::new("INSERT INTO person (Name) VALUES (:name)").bind("name", "Ada"),
//! ))?;
//!
//! let ada: Person = commands.queries().execute(&mut FindPersonById { id: 1 })?;
//! ```
//!
//! # Architecture
//!
//! | Layer | Crate | Contents |
//! |-------|-------|----------|
//! | core | `quill-core` | errors, row model, connection traits, SQLite adapter |
//! | cache | `quill-cache` | cache store, expiry, key derivation |
//! | transaction | `quill-transaction` | ambient transactions and scopes |
//! | executor | `quill-executor` | executors, SQL context, handlers, setup |
//!
//! Only the executor API is re-exported; it carries the lower layers' public
//! types.

pub use quill_executor::*;
