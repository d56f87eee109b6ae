//! The transaction object shared by every scope that joins it
//!
//! A [`Transaction`] is a cheap handle (`Arc` inside). All scopes that join
//! the same transaction hold clones of it; only the root scope finishes it.
//!
//! ## Lifecycle
//!
//! ```text
//! Active ──finish(commit)──> Committed
//!    │
//!    └──finish(rollback) / doomed / timed out──> Aborted
//! ```
//!
//! Finishing commits or rolls back the enlisted resources, publishes the
//! final status, then fires the completion handlers. The handler list is
//! taken out of the lock in one step before any handler runs, so each
//! handler fires exactly once and a handler registering another handler
//! sees the final status and is invoked immediately.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use quill_core::{DbError, DbResult, Error, Result};

use crate::timeout::{elapsed_to_ticks, ticks_to_timeout, timeout_to_ticks, NO_TIMEOUT};
use crate::types::{IsolationLevel, TransactionStatus};

/// Callback fired once when a transaction finishes
pub type CompletionHandler = Box<dyn FnOnce(TransactionStatus) + Send>;

/// A resource taking part in a transaction.
///
/// The connection layer enlists one per connection it opens inside a
/// scope. Enlistments are committed in enlistment order when the root scope
/// completes, and rolled back otherwise.
pub trait Enlistment: Send {
    /// Make the resource's work durable
    fn commit(&mut self) -> DbResult<()>;

    /// Discard the resource's work
    fn rollback(&mut self) -> DbResult<()>;
}

struct State {
    status: TransactionStatus,
    doomed: Option<String>,
    subscribers: Vec<CompletionHandler>,
    enlistments: Vec<Box<dyn Enlistment>>,
}

struct Inner {
    id: u64,
    isolation: IsolationLevel,
    timeout_ticks: i64,
    started: Instant,
    state: Mutex<State>,
}

/// Handle to a running or finished transaction
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl Transaction {
    pub(crate) fn new(id: u64, isolation: IsolationLevel, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                isolation,
                timeout_ticks: timeout_to_ticks(timeout),
                started: Instant::now(),
                state: Mutex::new(State {
                    status: TransactionStatus::Active,
                    doomed: None,
                    subscribers: Vec::new(),
                    enlistments: Vec::new(),
                }),
            }),
        }
    }

    /// Transaction id, unique per coordinator
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Isolation level the transaction was started with
    pub fn isolation_level(&self) -> IsolationLevel {
        self.inner.isolation
    }

    /// Timeout in ticks ([`NO_TIMEOUT`] when unbounded)
    pub fn timeout_ticks(&self) -> i64 {
        self.inner.timeout_ticks
    }

    /// Effective timeout after quantization; zero when unbounded
    pub fn timeout(&self) -> Duration {
        ticks_to_timeout(self.inner.timeout_ticks)
    }

    /// Time since the transaction started
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.inner.state.lock().status
    }

    /// Whether the transaction is still running
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Whether the transaction outlived its timeout
    pub fn is_timed_out(&self) -> bool {
        self.inner.timeout_ticks != NO_TIMEOUT
            && elapsed_to_ticks(self.elapsed()) > self.inner.timeout_ticks
    }

    /// Why the transaction can no longer commit, if it was doomed
    pub fn doomed_reason(&self) -> Option<String> {
        self.inner.state.lock().doomed.clone()
    }

    /// Same underlying transaction
    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Mark the transaction so the root scope rolls it back.
    ///
    /// The first reason wins; later calls keep it.
    pub fn rollback(&self, reason: impl Into<String>) {
        let mut state = self.inner.state.lock();
        if state.status == TransactionStatus::Active && state.doomed.is_none() {
            let reason = reason.into();
            debug!(target: "quill::txn", txn_id = self.inner.id, %reason, "Transaction doomed");
            state.doomed = Some(reason);
        }
    }

    /// Register a completion handler.
    ///
    /// Queued while the transaction is active; fired immediately with the
    /// final status if it already finished.
    pub fn on_completed<F>(&self, handler: F)
    where
        F: FnOnce(TransactionStatus) + Send + 'static,
    {
        let status = {
            let mut state = self.inner.state.lock();
            if state.status == TransactionStatus::Active {
                state.subscribers.push(Box::new(handler));
                return;
            }
            state.status
        };
        handler(status);
    }

    /// Enlist a resource in the transaction
    pub fn enlist(&self, enlistment: Box<dyn Enlistment>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(Error::InvalidScope {
                reason: format!("transaction {} is already {}", self.inner.id, state.status),
            });
        }
        state.enlistments.push(enlistment);
        Ok(())
    }

    /// Finish the transaction: commit if requested and still possible,
    /// otherwise roll back. Returns the error that prevented a requested
    /// commit, if any; the status is `Aborted` in that case.
    pub(crate) fn finish(&self, commit: bool) -> Result<TransactionStatus> {
        let (mut enlistments, mut failure) = {
            let mut state = self.inner.state.lock();
            if state.status != TransactionStatus::Active {
                return Err(Error::InvalidScope {
                    reason: format!("transaction {} is already {}", self.inner.id, state.status),
                });
            }
            let failure = if !commit {
                None
            } else if self.is_timed_out() {
                Some(Error::TransactionTimeout {
                    timeout: self.timeout(),
                })
            } else {
                state
                    .doomed
                    .clone()
                    .map(|reason| Error::TransactionAborted { reason })
            };
            (mem::take(&mut state.enlistments), failure)
        };

        let status = if commit && failure.is_none() {
            match commit_all(&mut enlistments) {
                Ok(()) => TransactionStatus::Committed,
                Err(e) => {
                    failure = Some(Error::Provider(e));
                    TransactionStatus::Aborted
                }
            }
        } else {
            if let Some(e) = rollback_all(&mut enlistments) {
                failure.get_or_insert(Error::Provider(e));
            }
            TransactionStatus::Aborted
        };

        let subscribers = {
            let mut state = self.inner.state.lock();
            state.status = status;
            mem::take(&mut state.subscribers)
        };
        debug!(
            target: "quill::txn",
            txn_id = self.inner.id,
            %status,
            handlers = subscribers.len(),
            "Transaction finished"
        );
        for handler in subscribers {
            handler(status);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(status),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("isolation", &self.inner.isolation)
            .field("timeout_ticks", &self.inner.timeout_ticks)
            .field("status", &self.status())
            .finish()
    }
}

fn commit_all(enlistments: &mut [Box<dyn Enlistment>]) -> std::result::Result<(), DbError> {
    for i in 0..enlistments.len() {
        if let Err(e) = enlistments[i].commit() {
            warn!(target: "quill::txn", error = %e, "Enlistment commit failed, rolling back the rest");
            let _ = rollback_all(&mut enlistments[i + 1..]);
            return Err(e);
        }
    }
    Ok(())
}

fn rollback_all(enlistments: &mut [Box<dyn Enlistment>]) -> Option<DbError> {
    let mut first = None;
    for enlistment in enlistments.iter_mut() {
        if let Err(e) = enlistment.rollback() {
            warn!(target: "quill::txn", error = %e, "Enlistment rollback failed");
            first.get_or_insert(e);
        }
    }
    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("enlistment failed")]
    struct EnlistFailure;

    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
        name: &'static str,
        fail_commit: bool,
    }

    impl Enlistment for Recording {
        fn commit(&mut self) -> DbResult<()> {
            if self.fail_commit {
                return Err(DbError::new(EnlistFailure));
            }
            self.log.lock().push(format!("commit {}", self.name));
            Ok(())
        }

        fn rollback(&mut self) -> DbResult<()> {
            self.log.lock().push(format!("rollback {}", self.name));
            Ok(())
        }
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str, fail_commit: bool) -> Box<dyn Enlistment> {
        Box::new(Recording {
            log: Arc::clone(log),
            name,
            fail_commit,
        })
    }

    #[test]
    fn test_commit_fires_handlers_in_order() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::ZERO);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            txn.on_completed(move |status| seen.lock().push((i, status)));
        }
        assert_eq!(txn.finish(true).unwrap(), TransactionStatus::Committed);
        assert_eq!(
            *seen.lock(),
            vec![
                (0, TransactionStatus::Committed),
                (1, TransactionStatus::Committed),
                (2, TransactionStatus::Committed)
            ]
        );
    }

    #[test]
    fn test_finish_twice_is_rejected() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::ZERO);
        txn.finish(false).unwrap();
        assert!(matches!(txn.finish(true), Err(Error::InvalidScope { .. })));
    }

    #[test]
    fn test_handler_after_finish_fires_immediately() {
        let txn = Transaction::new(1, IsolationLevel::Serializable, Duration::ZERO);
        txn.finish(false).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        txn.on_completed(move |status| {
            assert_eq!(status, TransactionStatus::Aborted);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_registering_handler_does_not_deadlock() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));
        let inner_txn = txn.clone();
        let c = Arc::clone(&calls);
        txn.on_completed(move |_| {
            let c2 = Arc::clone(&c);
            inner_txn.on_completed(move |_| {
                c2.fetch_add(10, Ordering::SeqCst);
            });
            c.fetch_add(1, Ordering::SeqCst);
        });
        txn.finish(true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_doomed_transaction_aborts_on_commit() {
        let txn = Transaction::new(7, IsolationLevel::ReadCommitted, Duration::ZERO);
        txn.rollback("first");
        txn.rollback("second");
        assert_eq!(txn.doomed_reason().as_deref(), Some("first"));
        match txn.finish(true) {
            Err(Error::TransactionAborted { reason }) => assert_eq!(reason, "first"),
            other => panic!("expected TransactionAborted, got {:?}", other),
        }
        assert_eq!(txn.status(), TransactionStatus::Aborted);
    }

    #[test]
    fn test_enlistments_commit_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::ZERO);
        txn.enlist(recording(&log, "a", false)).unwrap();
        txn.enlist(recording(&log, "b", false)).unwrap();
        txn.finish(true).unwrap();
        assert_eq!(*log.lock(), vec!["commit a", "commit b"]);
        assert!(txn.enlist(recording(&log, "c", false)).is_err());
    }

    #[test]
    fn test_failed_commit_rolls_back_remaining() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::ZERO);
        txn.enlist(recording(&log, "a", false)).unwrap();
        txn.enlist(recording(&log, "b", true)).unwrap();
        txn.enlist(recording(&log, "c", false)).unwrap();
        let err = txn.finish(true).unwrap_err();
        assert!(err.as_provider().map(|e| e.is::<EnlistFailure>()).unwrap_or(false));
        assert_eq!(*log.lock(), vec!["commit a", "rollback c"]);
        assert_eq!(txn.status(), TransactionStatus::Aborted);
    }

    #[test]
    fn test_rollback_without_commit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::ZERO);
        txn.enlist(recording(&log, "a", false)).unwrap();
        assert_eq!(txn.finish(false).unwrap(), TransactionStatus::Aborted);
        assert_eq!(*log.lock(), vec!["rollback a"]);
    }

    #[test]
    fn test_timeout_detection() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::from_millis(100));
        assert!(!txn.is_timed_out());
        std::thread::sleep(Duration::from_millis(600));
        assert!(txn.is_timed_out());
        assert!(matches!(txn.finish(true), Err(Error::TransactionTimeout { .. })));
    }

    #[test]
    fn test_no_timeout_never_times_out() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, Duration::ZERO);
        assert_eq!(txn.timeout_ticks(), NO_TIMEOUT);
        assert_eq!(txn.timeout(), Duration::ZERO);
        assert!(!txn.is_timed_out());
    }
}
