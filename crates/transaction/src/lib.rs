//! Ambient transaction scopes for Quill
//!
//! This crate coordinates the transaction a unit of work runs in:
//! - Coordinator: id allocation, outcome metrics, disposal handlers
//! - AmbientContext: the explicit "current transaction" of one flow
//! - TransactionScope: join / new / suppress, complete, dispose
//! - Transaction: status, completion handlers, enlisted resources
//! - Timeout ticks: the quantized timeout representation
//!
//! ```text
//! let mut scope = ambient.read_committed(ScopeOption::Required, 30)?;
//! ambient.on_transaction_completed(|status| ...);
//! ... work ...
//! scope.complete()?;
//! scope.dispose()?;     // commits, fires the completion handlers
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ambient;
pub mod coordinator;
pub mod scope;
pub mod timeout;
pub mod transaction;
pub mod types;

pub use ambient::AmbientContext;
pub use coordinator::{DisposalHandler, TransactionCoordinator, TransactionMetrics, DEFAULT_TIMEOUT};
pub use scope::TransactionScope;
pub use timeout::{ticks_to_seconds, ticks_to_timeout, timeout_to_ticks, NO_TIMEOUT};
pub use transaction::{CompletionHandler, Enlistment, Transaction};
pub use types::{IsolationLevel, ScopeOption, TransactionStatus};
