//! Facade integration tests
//!
//! End-to-end scenarios through the `quill` facade over SQLite:
//! - People directory: cached queries, commands, handlers
//! - Scopes: ambient transactions with enlisted resources

mod common;

mod people;
mod scopes;
