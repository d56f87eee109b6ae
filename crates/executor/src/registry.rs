//! Exception handler registry
//!
//! Handlers are registered against a concrete provider error type and
//! optionally one [`Operation`]. Dispatch matches the exact type recorded in
//! the [`DbError`]; there is no fallback to other types.
//!
//! ## Locking
//!
//! ```text
//! install / uninstall ──> table (Mutex) ──> evict memo[type]
//! dispatch ──> memo[type] hit?  ── yes ──> run chain (no lock held)
//!                    │
//!                    no ──> lock table, build Arc<[Entry]>, memoize, unlock
//! ```
//!
//! A chain is an immutable `Arc<[Entry]>` snapshot, so a dispatch racing
//! with installation sees either the old or the new chain, never a partial
//! one. Memo entries are only written while the table lock is held, so an
//! eviction can never be overwritten by a stale chain.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use quill_core::{DbError, Operation};

/// A type-erased handler: returns `true` when it handled the error
pub type HandlerFn = Arc<dyn Fn(Operation, &DbError) -> bool + Send + Sync>;

/// Identifies an installed handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct Entry {
    id: HandlerId,
    operation: Option<Operation>,
    handler: HandlerFn,
}

impl Entry {
    fn applies_to(&self, operation: Operation) -> bool {
        self.operation.map_or(true, |op| op == operation)
    }
}

#[derive(Default)]
struct Table {
    by_type: HashMap<TypeId, Vec<Entry>>,
    owners: HashMap<HandlerId, TypeId>,
}

/// Wrap a typed handler so it can be stored by `TypeId`
pub(crate) fn erase<E, F>(handler: F) -> HandlerFn
where
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
{
    Arc::new(move |operation, error: &DbError| {
        error
            .downcast_ref::<E>()
            .map_or(false, |e| handler(operation, e))
    })
}

/// Type-indexed registry of provider error handlers
pub struct ExceptionHandlerRegistry {
    next_id: AtomicU64,
    table: Mutex<Table>,
    memo: DashMap<TypeId, Arc<[Entry]>>,
}

impl ExceptionHandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            table: Mutex::new(Table::default()),
            memo: DashMap::new(),
        }
    }

    /// Install a handler for errors of type `E` raised by any operation
    pub fn install<E, F>(&self, handler: F) -> HandlerId
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        self.insert(TypeId::of::<E>(), std::any::type_name::<E>(), None, erase(handler))
    }

    /// Install a handler for errors of type `E` raised by one operation
    pub fn install_for<E, F>(&self, operation: Operation, handler: F) -> HandlerId
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        self.insert(
            TypeId::of::<E>(),
            std::any::type_name::<E>(),
            Some(operation),
            erase(handler),
        )
    }

    fn insert(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        operation: Option<Operation>,
        handler: HandlerFn,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut table = self.table.lock();
        table.by_type.entry(type_id).or_default().push(Entry {
            id,
            operation,
            handler,
        });
        table.owners.insert(id, type_id);
        self.memo.remove(&type_id);
        debug!(target: "quill::handlers", error_type = type_name, ?operation, "Exception handler installed");
        id
    }

    /// Remove one handler; returns whether it was installed
    pub fn uninstall(&self, id: HandlerId) -> bool {
        let mut table = self.table.lock();
        let Some(type_id) = table.owners.remove(&id) else {
            return false;
        };
        if let Some(entries) = table.by_type.get_mut(&type_id) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                table.by_type.remove(&type_id);
            }
        }
        self.memo.remove(&type_id);
        debug!(target: "quill::handlers", ?id, "Exception handler uninstalled");
        true
    }

    /// Remove every handler for `E`; returns how many were removed
    pub fn uninstall_all<E: 'static>(&self) -> usize {
        let type_id = TypeId::of::<E>();
        let mut table = self.table.lock();
        let removed = table.by_type.remove(&type_id).unwrap_or_default();
        for entry in &removed {
            table.owners.remove(&entry.id);
        }
        self.memo.remove(&type_id);
        removed.len()
    }

    /// Remove every handler
    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.by_type.clear();
        table.owners.clear();
        self.memo.clear();
    }

    /// Number of installed handlers
    pub fn handler_count(&self) -> usize {
        self.table.lock().owners.len()
    }

    /// Number of installed handlers for `E`
    pub fn handler_count_for<E: 'static>(&self) -> usize {
        self.table
            .lock()
            .by_type
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    fn chain(&self, type_id: TypeId) -> Arc<[Entry]> {
        if let Some(chain) = self.memo.get(&type_id) {
            return Arc::clone(chain.value());
        }
        let table = self.table.lock();
        let chain: Arc<[Entry]> = table
            .by_type
            .get(&type_id)
            .map(|entries| entries.as_slice().into())
            .unwrap_or_else(|| Arc::from(Vec::new()));
        self.memo.insert(type_id, Arc::clone(&chain));
        chain
    }

    /// Offer an error to the handlers for its exact type, oldest first.
    ///
    /// Returns `true` as soon as one handler reports it handled the error.
    pub fn dispatch(&self, operation: Operation, error: &DbError) -> bool {
        let chain = self.chain(error.type_id());
        for entry in chain.iter().filter(|e| e.applies_to(operation)) {
            if (entry.handler)(operation, error) {
                debug!(
                    target: "quill::handlers",
                    %operation,
                    error_type = error.type_name(),
                    handler = entry.id.0,
                    "Provider error handled"
                );
                return true;
            }
        }
        trace!(
            target: "quill::handlers",
            %operation,
            error_type = error.type_name(),
            candidates = chain.len(),
            "Provider error not handled"
        );
        false
    }
}

impl Default for ExceptionHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExceptionHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionHandlerRegistry")
            .field("handlers", &self.handler_count())
            .field("memoized_types", &self.memo.len())
            .finish()
    }
}
