//! Configuration surface
//!
//! [`Setup`] is the fluent, one-time wiring step: connection factory,
//! global exception handlers, entity column mappings and settings. It
//! produces a shared [`Configuration`] that executors are built from.
//!
//! ```text
//! let config = Setup::new()
//!     .connection_factory(factory)
//!     .exception_handler::<DuplicateKey, _>(|op, e| op == Operation::Insert)
//!     .map_entity::<Person>()
//!     .build();
//! let queries = QueryExecutor::new(Arc::clone(&config));
//! ```

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::info;

use quill_cache::{Cache, MemoryCache, NoCache};
use quill_core::{ColumnMap, ConnectionFactory, Error, Operation, Result};
use quill_transaction::{AmbientContext, TransactionCoordinator};

use crate::config::QuillConfig;
use crate::policy::PolicyCache;
use crate::registry::{ExceptionHandlerRegistry, HandlerId};

/// A row-mapped type with optional column renames.
///
/// `column_aliases` maps a result column name to the field name the type
/// deserializes from. Register the type with [`Setup::map_entity`].
pub trait Entity: DeserializeOwned + 'static {
    /// `(column, field)` pairs
    fn column_aliases() -> &'static [(&'static str, &'static str)] {
        &[]
    }
}

fn column_map<T: Entity>() -> ColumnMap {
    T::column_aliases()
        .iter()
        .map(|(column, field)| (column.to_string(), field.to_string()))
        .collect()
}

/// Shared state behind every executor built from one setup
pub struct Configuration {
    factory: RwLock<Option<Arc<dyn ConnectionFactory>>>,
    handlers: ExceptionHandlerRegistry,
    debug_messages: AtomicBool,
    entities: DashMap<TypeId, Arc<ColumnMap>>,
    settings: QuillConfig,
    coordinator: Arc<TransactionCoordinator>,
    cache: Arc<dyn Cache>,
    pub(crate) policies: PolicyCache,
}

impl Configuration {
    /// The connection factory, or a configuration error if none is set
    pub fn connection_factory(&self) -> Result<Arc<dyn ConnectionFactory>> {
        self.factory.read().clone().ok_or_else(|| {
            Error::configuration("no connection factory configured; call Setup::connection_factory")
        })
    }

    /// Replace the connection factory
    pub fn set_connection_factory(&self, factory: Arc<dyn ConnectionFactory>) {
        *self.factory.write() = Some(factory);
    }

    /// Global exception handlers
    pub fn handlers(&self) -> &ExceptionHandlerRegistry {
        &self.handlers
    }

    /// Install a global handler for provider errors of type `E`
    pub fn install_handler<E, F>(&self, handler: F) -> HandlerId
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        self.handlers.install::<E, F>(handler)
    }

    /// Install a global handler for `E` raised by one operation
    pub fn install_handler_for<E, F>(&self, operation: Operation, handler: F) -> HandlerId
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        self.handlers.install_for::<E, F>(operation, handler)
    }

    /// Remove a global handler
    pub fn uninstall_handler(&self, id: HandlerId) -> bool {
        self.handlers.uninstall(id)
    }

    /// Whether not-found messages include SQL and parameters
    pub fn debug_messages(&self) -> bool {
        self.debug_messages.load(Ordering::Relaxed)
    }

    /// Toggle detailed not-found messages
    pub fn set_debug_messages(&self, enabled: bool) {
        self.debug_messages.store(enabled, Ordering::Relaxed);
    }

    /// Settings this configuration was built with
    pub fn settings(&self) -> &QuillConfig {
        &self.settings
    }

    /// Default statement timeout
    pub fn command_timeout(&self) -> Option<Duration> {
        self.settings.command_timeout()
    }

    /// Slow statement threshold
    pub fn slow_statement_threshold(&self) -> Duration {
        self.settings.slow_statement_threshold()
    }

    /// Transaction coordinator shared by all ambient contexts
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// A fresh ambient context on this configuration's coordinator
    pub fn new_ambient(&self) -> AmbientContext {
        AmbientContext::new(Arc::clone(&self.coordinator))
    }

    /// Shared cache store
    pub fn cache(&self) -> Arc<dyn Cache> {
        Arc::clone(&self.cache)
    }

    /// Register column aliases for `T`
    pub fn map_entity<T: Entity>(&self) {
        self.entities
            .insert(TypeId::of::<T>(), Arc::new(column_map::<T>()));
    }

    /// Column mapping registered for `T`, if any
    pub fn mapping<T: 'static>(&self) -> Option<Arc<ColumnMap>> {
        self.entities
            .get(&TypeId::of::<T>())
            .map(|m| Arc::clone(m.value()))
    }

    /// Clear the connection factory, exception handlers, debug flag,
    /// entity mappings and resolved cache policies.
    pub fn reset(&self) {
        *self.factory.write() = None;
        self.handlers.clear();
        self.debug_messages.store(false, Ordering::Relaxed);
        self.entities.clear();
        self.policies.clear();
        info!(target: "quill::executor", "Configuration reset");
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("has_factory", &self.factory.read().is_some())
            .field("handlers", &self.handlers)
            .field("debug_messages", &self.debug_messages())
            .field("entities", &self.entities.len())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Fluent builder for [`Configuration`]
#[derive(Default)]
pub struct Setup {
    factory: Option<Arc<dyn ConnectionFactory>>,
    handlers: ExceptionHandlerRegistry,
    entities: Vec<(TypeId, ColumnMap)>,
    settings: QuillConfig,
    debug_messages: Option<bool>,
    cache: Option<Arc<dyn Cache>>,
}

impl Setup {
    /// Start with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `factory` for every data-access call
    pub fn connection_factory<F>(mut self, factory: F) -> Self
    where
        F: ConnectionFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Use an already shared factory
    pub fn shared_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Install a global handler for provider errors of type `E`
    pub fn exception_handler<E, F>(self, handler: F) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        self.handlers.install::<E, F>(handler);
        self
    }

    /// Install a global handler for `E` raised by one operation
    pub fn exception_handler_for<E, F>(self, operation: Operation, handler: F) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(Operation, &E) -> bool + Send + Sync + 'static,
    {
        self.handlers.install_for::<E, F>(operation, handler);
        self
    }

    /// Toggle detailed not-found messages; overrides the settings' flag
    pub fn debug_messages(mut self, enabled: bool) -> Self {
        self.debug_messages = Some(enabled);
        self
    }

    /// Register column aliases for `T`
    pub fn map_entity<T: Entity>(mut self) -> Self {
        self.entities.push((TypeId::of::<T>(), column_map::<T>()));
        self
    }

    /// Replace all settings.
    ///
    /// An explicit [`Setup::debug_messages`] wins over the settings' flag
    /// regardless of call order.
    pub fn settings(mut self, settings: QuillConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Use an explicit shared cache store instead of the configured one
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Finish the setup
    pub fn build(mut self) -> Arc<Configuration> {
        if let Some(enabled) = self.debug_messages {
            self.settings.debug_messages = enabled;
        }
        let cache = self.cache.unwrap_or_else(|| {
            if self.settings.cache.enabled {
                Arc::new(MemoryCache::new()) as Arc<dyn Cache>
            } else {
                NoCache::shared()
            }
        });
        let coordinator = TransactionCoordinator::shared(self.settings.transaction_timeout());
        let entities = DashMap::new();
        for (type_id, map) in self.entities {
            entities.insert(type_id, Arc::new(map));
        }
        info!(
            target: "quill::executor",
            has_factory = self.factory.is_some(),
            handlers = self.handlers.handler_count(),
            entities = entities.len(),
            "Configuration built"
        );
        Arc::new(Configuration {
            factory: RwLock::new(self.factory),
            handlers: self.handlers,
            debug_messages: AtomicBool::new(self.settings.debug_messages),
            entities,
            settings: self.settings,
            coordinator,
            cache,
            policies: PolicyCache::new(),
        })
    }
}
