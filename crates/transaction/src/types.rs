//! Isolation levels, scope options and transaction status

use std::fmt;

/// Isolation level of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Dirty reads allowed
    ReadUncommitted,
    /// Only committed data is read
    #[default]
    ReadCommitted,
    /// Rows read stay stable until the transaction ends
    RepeatableRead,
    /// Fully serializable execution
    Serializable,
    /// Reads see a snapshot taken at transaction start
    Snapshot,
}

impl IsolationLevel {
    /// SQL spelling of the level
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// How a new scope relates to an existing ambient transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeOption {
    /// Join the ambient transaction if there is one, otherwise start one
    #[default]
    Required,
    /// Always start a new transaction, hiding the ambient one
    RequiresNew,
}

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Still running
    Active,
    /// Committed successfully
    Committed,
    /// Rolled back
    Aborted,
}

impl TransactionStatus {
    /// Whether the transaction has finished either way
    pub fn is_finished(&self) -> bool {
        !matches!(self, TransactionStatus::Active)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
