//! Small shared types
//!
//! - [`Operation`]: coarse statement category used to key exception handling
//! - [`RequestInfo`]: what a connection factory learns about the caller

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse category of a data-access call.
///
/// Exception handlers may be restricted to one operation, and diagnostics
/// report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Row selection
    Select,
    /// Row insertion
    Insert,
    /// Row update
    Update,
    /// Row deletion
    Delete,
    /// Schema change
    Ddl,
}

impl Operation {
    /// All operations, in declaration order
    pub const ALL: [Operation; 5] = [
        Operation::Select,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
        Operation::Ddl,
    ];

    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Ddl => "ddl",
        }
    }

    /// Whether the operation mutates rows or schema
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Select)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the request a connection is being created for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestInfo {
    /// Short type name of the request
    pub type_name: &'static str,
    /// Operation about to run
    pub operation: Operation,
}

impl RequestInfo {
    /// Create request info
    pub fn new(type_name: &'static str, operation: Operation) -> Self {
        Self {
            type_name,
            operation,
        }
    }
}

/// Short name of a type: path and generic arguments stripped.
///
/// `app::queries::FindPersonById` becomes `FindPersonById`;
/// `app::SelectQuery<app::Person>` becomes `SelectQuery`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    short_name(std::any::type_name::<T>())
}

/// Strip module path and generic arguments from a full type name
pub fn short_name(full: &'static str) -> &'static str {
    let base = match full.find('<') {
        Some(index) => &full[..index],
        None => full,
    };
    match base.rfind("::") {
        Some(index) => &base[index + 2..],
        None => base,
    }
}
