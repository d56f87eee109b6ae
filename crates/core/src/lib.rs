//! Core types and traits for Quill
//!
//! This crate defines what every other layer shares:
//! - Error: the error taxonomy and provider error wrapper ([`DbError`])
//! - Operation: statement category used to key exception handling
//! - Row model: [`Row`], [`ResultSet`], [`Params`], column mappings
//! - Traits: [`Connection`], [`ConnectionFactory`] (the SQL execution primitive)
//! - SQLite adapter (feature `sqlite`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod row;
pub mod traits;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{DbError, Error, Result};
pub use row::{ColumnMap, Params, ResultSet, Row, Segment, Value};
pub use traits::{Connection, ConnectionFactory, DbResult};
pub use types::{short_name, short_type_name, Operation, RequestInfo};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteConnectionFactory};
