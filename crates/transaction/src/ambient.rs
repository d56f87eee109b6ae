//! The ambient transaction carrier
//!
//! [`AmbientContext`] holds the "current transaction" of one logical flow.
//! Scopes created from it install and restore the current transaction; code
//! running inside a scope reads it through the same context. Clones share
//! the current transaction. Use [`AmbientContext::detached`] to start an
//! independent flow (for example on another thread).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use quill_core::{Error, Result};

use crate::coordinator::TransactionCoordinator;
use crate::scope::TransactionScope;
use crate::transaction::Transaction;
use crate::types::{IsolationLevel, ScopeOption, TransactionStatus};

/// Current-transaction carrier for one logical flow
#[derive(Clone)]
pub struct AmbientContext {
    coordinator: Arc<TransactionCoordinator>,
    current: Arc<Mutex<Option<Transaction>>>,
}

impl AmbientContext {
    /// Create an empty context
    pub fn new(coordinator: Arc<TransactionCoordinator>) -> Self {
        Self {
            coordinator,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// A context for an independent flow sharing the same coordinator
    pub fn detached(&self) -> Self {
        Self::new(Arc::clone(&self.coordinator))
    }

    /// The coordinator behind this context
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// The ambient transaction, if any
    pub fn current(&self) -> Option<Transaction> {
        self.current.lock().clone()
    }

    /// Whether an ambient transaction exists
    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    /// The ambient transaction, or `TransactionRequired`
    pub fn require_transaction(&self) -> Result<Transaction> {
        self.current().ok_or(Error::TransactionRequired)
    }

    /// Subscribe to completion of the ambient transaction.
    ///
    /// With no ambient transaction the handler fires immediately with
    /// `Committed`: the work it follows ran as its own unit.
    pub fn on_transaction_completed<F>(&self, handler: F)
    where
        F: FnOnce(TransactionStatus) + Send + 'static,
    {
        match self.current() {
            Some(txn) => {
                trace!(target: "quill::txn", txn_id = txn.id(), "Completion handler queued");
                txn.on_completed(handler);
            }
            None => {
                trace!(target: "quill::txn", "No ambient transaction, completion handler fired");
                handler(TransactionStatus::Committed);
            }
        }
    }

    pub(crate) fn replace(&self, txn: Option<Transaction>) -> Option<Transaction> {
        std::mem::replace(&mut *self.current.lock(), txn)
    }

    // ========================================================================
    // Scope factories
    // ========================================================================

    /// A scope with no ambient transaction inside it
    pub fn suppress(&self) -> TransactionScope {
        TransactionScope::suppressed(self.clone())
    }

    /// A `READ UNCOMMITTED` scope
    pub fn read_uncommitted(&self, option: ScopeOption, timeout_secs: u64) -> Result<TransactionScope> {
        self.scope(option, IsolationLevel::ReadUncommitted, secs(timeout_secs))
    }

    /// A `READ COMMITTED` scope
    pub fn read_committed(&self, option: ScopeOption, timeout_secs: u64) -> Result<TransactionScope> {
        self.scope(option, IsolationLevel::ReadCommitted, secs(timeout_secs))
    }

    /// A `REPEATABLE READ` scope
    pub fn repeatable_read(&self, option: ScopeOption, timeout_secs: u64) -> Result<TransactionScope> {
        self.scope(option, IsolationLevel::RepeatableRead, secs(timeout_secs))
    }

    /// A `SERIALIZABLE` scope
    pub fn serializable(&self, option: ScopeOption, timeout_secs: u64) -> Result<TransactionScope> {
        self.scope(option, IsolationLevel::Serializable, secs(timeout_secs))
    }

    /// A `SNAPSHOT` scope
    pub fn snapshot(&self, option: ScopeOption, timeout_secs: u64) -> Result<TransactionScope> {
        self.scope(option, IsolationLevel::Snapshot, secs(timeout_secs))
    }

    /// Join the ambient transaction whatever its level, or start one at
    /// `level` when there is none.
    pub fn join_or_default(
        &self,
        level: IsolationLevel,
        option: ScopeOption,
        timeout_secs: u64,
    ) -> Result<TransactionScope> {
        if option == ScopeOption::Required {
            if let Some(txn) = self.current() {
                return Ok(TransactionScope::joined(self.clone(), txn));
            }
        }
        Ok(TransactionScope::root(self.clone(), level, secs(timeout_secs)))
    }

    /// A `Required` scope at `level` with the coordinator's default timeout
    pub fn begin(&self, level: IsolationLevel) -> Result<TransactionScope> {
        self.scope(ScopeOption::Required, level, self.coordinator.default_timeout())
    }

    /// General scope factory.
    ///
    /// Joining with `Required` fails with `InvalidScope` if the ambient
    /// transaction runs at a different isolation level; use
    /// [`AmbientContext::join_or_default`] to accept whatever level is
    /// running. A zero timeout means unbounded.
    pub fn scope(
        &self,
        option: ScopeOption,
        level: IsolationLevel,
        timeout: Duration,
    ) -> Result<TransactionScope> {
        if option == ScopeOption::Required {
            if let Some(txn) = self.current() {
                if txn.isolation_level() != level {
                    return Err(Error::InvalidScope {
                        reason: format!(
                            "cannot join transaction {} running at {} with a {} scope",
                            txn.id(),
                            txn.isolation_level(),
                            level
                        ),
                    });
                }
                return Ok(TransactionScope::joined(self.clone(), txn));
            }
        }
        Ok(TransactionScope::root(self.clone(), level, timeout))
    }
}

fn secs(timeout_secs: u64) -> Duration {
    Duration::from_secs(timeout_secs)
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientContext")
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> AmbientContext {
        AmbientContext::new(TransactionCoordinator::shared(Duration::from_secs(30)))
    }

    #[test]
    fn test_require_transaction() {
        let ctx = context();
        assert!(matches!(ctx.require_transaction(), Err(Error::TransactionRequired)));
        let scope = ctx.read_committed(ScopeOption::Required, 0).unwrap();
        assert_eq!(ctx.require_transaction().unwrap().id(), scope.transaction().map(|t| t.id()).unwrap());
    }

    #[test]
    fn test_completion_without_transaction_fires_immediately() {
        let ctx = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        ctx.on_transaction_completed(move |status| {
            assert_eq!(status, TransactionStatus::Committed);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detached_context_has_no_transaction() {
        let ctx = context();
        let _scope = ctx.serializable(ScopeOption::Required, 0).unwrap();
        assert!(ctx.is_active());
        assert!(!ctx.detached().is_active());
        assert!(ctx.clone().is_active());
    }

    #[test]
    fn test_join_level_mismatch_is_rejected() {
        let ctx = context();
        let _outer = ctx.serializable(ScopeOption::Required, 0).unwrap();
        assert!(matches!(
            ctx.read_committed(ScopeOption::Required, 0),
            Err(Error::InvalidScope { .. })
        ));
        let joined = ctx
            .join_or_default(IsolationLevel::ReadCommitted, ScopeOption::Required, 0)
            .unwrap();
        assert_eq!(
            joined.transaction().map(|t| t.isolation_level()),
            Some(IsolationLevel::Serializable)
        );
    }

    #[test]
    fn test_begin_uses_default_timeout() {
        let ctx = context();
        let scope = ctx.begin(IsolationLevel::RepeatableRead).unwrap();
        let txn = scope.transaction().cloned().unwrap();
        assert_eq!(crate::ticks_to_seconds(txn.timeout_ticks()), 30);
    }
}
