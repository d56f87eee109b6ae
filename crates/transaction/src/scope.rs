//! Transaction scopes
//!
//! A [`TransactionScope`] is created by an [`AmbientContext`] factory and
//! plays one of three roles:
//!
//! | Role | Created when | On dispose |
//! |------|--------------|------------|
//! | root | no ambient transaction, or `RequiresNew` | finish the transaction, restore the previous ambient one |
//! | joined | `Required` with an ambient transaction | doom the transaction unless completed |
//! | suppressed | `suppress()` | restore the previous ambient transaction |
//!
//! Root disposal commits only when the scope was completed, every joined
//! scope was completed too, and the timeout has not elapsed. Errors raised
//! while finishing are offered to the coordinator's disposal handlers and
//! swallowed if one handles them.
//!
//! Dropping a scope disposes it; `dispose()` does the same but returns the
//! outcome instead of logging it.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use quill_core::{Error, Result};

use crate::ambient::AmbientContext;
use crate::transaction::Transaction;
use crate::types::{IsolationLevel, TransactionStatus};

enum Role {
    Root {
        transaction: Transaction,
        previous: Option<Transaction>,
    },
    Joined {
        transaction: Transaction,
    },
    Suppressed {
        previous: Option<Transaction>,
    },
}

/// A unit of work bound to the ambient transaction
pub struct TransactionScope {
    ambient: AmbientContext,
    role: Role,
    completed: bool,
    disposed: bool,
}

impl TransactionScope {
    pub(crate) fn root(ambient: AmbientContext, level: IsolationLevel, timeout: Duration) -> Self {
        let transaction = ambient.coordinator().begin(level, timeout);
        let previous = ambient.replace(Some(transaction.clone()));
        Self {
            ambient,
            role: Role::Root {
                transaction,
                previous,
            },
            completed: false,
            disposed: false,
        }
    }

    pub(crate) fn joined(ambient: AmbientContext, transaction: Transaction) -> Self {
        debug!(target: "quill::txn", txn_id = transaction.id(), "Scope joined transaction");
        Self {
            ambient,
            role: Role::Joined { transaction },
            completed: false,
            disposed: false,
        }
    }

    pub(crate) fn suppressed(ambient: AmbientContext) -> Self {
        let previous = ambient.replace(None);
        Self {
            ambient,
            role: Role::Suppressed { previous },
            completed: false,
            disposed: false,
        }
    }

    /// The transaction this scope runs in; `None` when suppressed
    pub fn transaction(&self) -> Option<&Transaction> {
        match &self.role {
            Role::Root { transaction, .. } | Role::Joined { transaction } => Some(transaction),
            Role::Suppressed { .. } => None,
        }
    }

    /// Whether this scope started its own transaction
    pub fn is_root(&self) -> bool {
        matches!(self.role, Role::Root { .. })
    }

    /// Whether `complete()` was called
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Vote to commit. May be called once.
    pub fn complete(&mut self) -> Result<()> {
        if self.completed {
            return Err(Error::InvalidScope {
                reason: "scope already completed".to_string(),
            });
        }
        self.completed = true;
        Ok(())
    }

    /// End the scope and report the transaction status it left behind.
    ///
    /// A joined scope reports the still-running transaction's status; a
    /// suppressed scope reports `Committed`.
    pub fn dispose(mut self) -> Result<TransactionStatus> {
        self.finish()
    }

    fn finish(&mut self) -> Result<TransactionStatus> {
        self.disposed = true;
        match &mut self.role {
            Role::Suppressed { previous } => {
                self.ambient.replace(previous.take());
                Ok(TransactionStatus::Committed)
            }
            Role::Joined { transaction } => {
                if !self.completed {
                    transaction.rollback("a joined scope was disposed without completing");
                }
                Ok(transaction.status())
            }
            Role::Root {
                transaction,
                previous,
            } => {
                self.ambient.replace(previous.take());
                let result = transaction.finish(self.completed);
                let coordinator = self.ambient.coordinator();
                coordinator.record_outcome(match &result {
                    Ok(status) => *status,
                    Err(_) => TransactionStatus::Aborted,
                });
                match result {
                    Ok(status) => Ok(status),
                    Err(e) if coordinator.handle_disposal_error(&e) => Ok(TransactionStatus::Aborted),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(e) = self.finish() {
            warn!(target: "quill::txn", error = %e, "Transaction scope dropped with error");
        }
    }
}

impl fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Root { .. } => "root",
            Role::Joined { .. } => "joined",
            Role::Suppressed { .. } => "suppressed",
        };
        f.debug_struct("TransactionScope")
            .field("role", &role)
            .field("transaction", &self.transaction())
            .field("completed", &self.completed)
            .finish()
    }
}
