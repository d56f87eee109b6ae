//! Transaction coordinator
//!
//! Allocates transaction ids, keeps outcome metrics and owns the disposal
//! handler registry. One coordinator is shared (`Arc`) by every
//! [`AmbientContext`](crate::AmbientContext) of a configuration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use quill_core::Error;

use crate::transaction::Transaction;
use crate::types::{IsolationLevel, TransactionStatus};

/// Default timeout for scopes that do not name one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Handler offered errors raised while disposing a root scope.
///
/// Returns `true` when it handled the error, which swallows it.
pub type DisposalHandler = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Counters describing transaction outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Transactions started
    pub started: u64,
    /// Transactions committed
    pub committed: u64,
    /// Transactions rolled back
    pub aborted: u64,
}

impl TransactionMetrics {
    /// Transactions started but not yet finished
    pub fn active(&self) -> u64 {
        self.started
            .saturating_sub(self.committed)
            .saturating_sub(self.aborted)
    }
}

/// Shared transaction bookkeeping
pub struct TransactionCoordinator {
    next_id: AtomicU64,
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    default_timeout: Duration,
    disposal_handlers: RwLock<Vec<(Uuid, DisposalHandler)>>,
}

impl TransactionCoordinator {
    /// Create a coordinator with the given default scope timeout
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            default_timeout,
            disposal_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Shareable handle
    pub fn shared(default_timeout: Duration) -> Arc<Self> {
        Arc::new(Self::new(default_timeout))
    }

    /// Timeout used by scopes that do not name one
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Start a new transaction; a zero timeout means unbounded
    pub fn begin(&self, isolation: IsolationLevel, timeout: Duration) -> Transaction {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "quill::txn", txn_id = id, %isolation, ?timeout, "Transaction started");
        Transaction::new(id, isolation, timeout)
    }

    pub(crate) fn record_outcome(&self, status: TransactionStatus) {
        match status {
            TransactionStatus::Committed => {
                self.committed.fetch_add(1, Ordering::Relaxed);
            }
            TransactionStatus::Aborted => {
                self.aborted.fetch_add(1, Ordering::Relaxed);
            }
            TransactionStatus::Active => {}
        }
    }

    /// Snapshot of the outcome counters
    pub fn metrics(&self) -> TransactionMetrics {
        TransactionMetrics {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }

    /// Register a disposal handler; the returned id removes it again
    pub fn register_disposal_handler<F>(&self, handler: F) -> Uuid
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.disposal_handlers.write().push((id, Arc::new(handler)));
        debug!(target: "quill::txn", %id, "Disposal handler registered");
        id
    }

    /// Remove a disposal handler; returns whether it was registered
    pub fn unregister_disposal_handler(&self, id: Uuid) -> bool {
        let mut handlers = self.disposal_handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Number of registered disposal handlers
    pub fn disposal_handler_count(&self) -> usize {
        self.disposal_handlers.read().len()
    }

    /// Remove every disposal handler
    pub fn clear_disposal_handlers(&self) {
        self.disposal_handlers.write().clear();
    }

    /// Offer a disposal error to the handlers, oldest first.
    ///
    /// Handlers run outside the registry lock so they may register or
    /// remove handlers themselves.
    pub fn handle_disposal_error(&self, error: &Error) -> bool {
        let handlers: Vec<DisposalHandler> = self
            .disposal_handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        let handled = handlers.iter().any(|handler| handler(error));
        if handled {
            info!(target: "quill::txn", error = %error, "Disposal error handled");
        }
        handled
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("metrics", &self.metrics())
            .field("default_timeout", &self.default_timeout)
            .field("disposal_handlers", &self.disposal_handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let coordinator = TransactionCoordinator::default();
        let a = coordinator.begin(IsolationLevel::ReadCommitted, Duration::ZERO);
        let b = coordinator.begin(IsolationLevel::ReadCommitted, Duration::ZERO);
        assert!(b.id() > a.id());
        assert_eq!(coordinator.metrics().started, 2);
        assert_eq!(coordinator.metrics().active(), 2);
    }

    #[test]
    fn test_record_outcome() {
        let coordinator = TransactionCoordinator::default();
        coordinator.begin(IsolationLevel::ReadCommitted, Duration::ZERO);
        coordinator.begin(IsolationLevel::ReadCommitted, Duration::ZERO);
        coordinator.record_outcome(TransactionStatus::Committed);
        coordinator.record_outcome(TransactionStatus::Aborted);
        let metrics = coordinator.metrics();
        assert_eq!(metrics.committed, 1);
        assert_eq!(metrics.aborted, 1);
        assert_eq!(metrics.active(), 0);
    }

    #[test]
    fn test_disposal_handlers_register_and_remove() {
        let coordinator = TransactionCoordinator::default();
        let err = Error::TransactionAborted {
            reason: "x".to_string(),
        };
        assert!(!coordinator.handle_disposal_error(&err));

        let ignore = coordinator.register_disposal_handler(|_| false);
        let swallow = coordinator
            .register_disposal_handler(|e| matches!(e, Error::TransactionAborted { .. }));
        assert_eq!(coordinator.disposal_handler_count(), 2);
        assert!(coordinator.handle_disposal_error(&err));
        assert!(!coordinator.handle_disposal_error(&Error::TransactionRequired));

        assert!(coordinator.unregister_disposal_handler(swallow));
        assert!(!coordinator.unregister_disposal_handler(swallow));
        assert!(!coordinator.handle_disposal_error(&err));
        assert!(coordinator.unregister_disposal_handler(ignore));
        assert_eq!(coordinator.disposal_handler_count(), 0);
    }
}
