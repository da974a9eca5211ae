//! Runtime context: the explicitly passed handle to every runtime service.

use std::sync::Arc;

use chronicle_core::aggregate::{AggregateRegistry, AggregateState};
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::SnapshotPolicy;
use chronicle_core::store::{EventStore, HandlerRecordStore, PublishedVersionStore, SnapshotStore};
use chronicle_core::transport::MessageSender;
use chronicle_event_store::{
    InMemoryEventStore, InMemoryHandlerRecordStore, InMemoryPublishedVersionStore,
    InMemorySnapshotStore,
};
use tracing::info;

use crate::bus::CommandBus;
use crate::cache::MemoryCache;
use crate::command_result::CommandResultManager;
use crate::config::RuntimeConfig;
use crate::handling::HandlerInvoker;
use crate::repository::Repository;

/// Shared runtime services built once from a [`RuntimeConfig`].
#[derive(Clone)]
pub struct RuntimeContext {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<AggregateRegistry>,
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    published: Arc<dyn PublishedVersionStore>,
    policy: Arc<dyn SnapshotPolicy>,
    cache: Arc<MemoryCache>,
    results: Arc<CommandResultManager>,
    invoker: Arc<HandlerInvoker>,
}

impl RuntimeContext {
    /// Starts building a context from `config`.
    #[must_use]
    pub fn builder(config: RuntimeConfig) -> RuntimeContextBuilder {
        RuntimeContextBuilder {
            config,
            clock: None,
            events: None,
            snapshots: None,
            records: None,
            published: None,
        }
    }

    /// A context with in-memory stores and the system clock.
    #[must_use]
    pub fn in_memory(config: RuntimeConfig) -> Self {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    #[must_use]
    pub fn snapshot_store(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    /// Per-aggregate versions already handed to subscribers.
    #[must_use]
    pub fn published_version_store(&self) -> &Arc<dyn PublishedVersionStore> {
        &self.published
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    #[must_use]
    pub fn results(&self) -> &Arc<CommandResultManager> {
        &self.results
    }

    #[must_use]
    pub fn invoker(&self) -> &Arc<HandlerInvoker> {
        &self.invoker
    }

    /// A repository for aggregates with state `S`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the aggregate registry is
    /// unavailable.
    pub fn repository<S: AggregateState>(&self) -> Result<Repository<S>, DomainError> {
        Ok(Repository::new(
            Arc::clone(&self.events),
            Arc::clone(&self.snapshots),
            Arc::clone(&self.policy),
            Arc::clone(&self.cache),
            Arc::clone(&self.clock),
            self.registry.table::<S>()?,
        ))
    }

    /// A command bus sending through `sender` and reporting to this
    /// context's result manager.
    #[must_use]
    pub fn command_bus(&self, sender: Arc<dyn MessageSender>) -> CommandBus {
        CommandBus::new(sender, Arc::clone(&self.results), Arc::clone(&self.clock))
    }

    /// Fails every pending command result and empties the cache.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the cache is unavailable.
    pub fn shutdown(&self) -> Result<(), DomainError> {
        let failed = self
            .results
            .fail_all(&DomainError::Infrastructure("runtime shut down".into()));
        self.cache.clear()?;
        info!(failed_commands = failed, "runtime shut down");
        Ok(())
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RuntimeContext`]. Unset collaborators default to the
/// in-memory stores and the system clock.
pub struct RuntimeContextBuilder {
    config: RuntimeConfig,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventStore>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    records: Option<Arc<dyn HandlerRecordStore>>,
    published: Option<Arc<dyn PublishedVersionStore>>,
}

impl RuntimeContextBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn snapshot_store(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    #[must_use]
    pub fn handler_record_store(mut self, records: Arc<dyn HandlerRecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    #[must_use]
    pub fn published_version_store(mut self, published: Arc<dyn PublishedVersionStore>) -> Self {
        self.published = Some(published);
        self
    }

    /// Wires the context.
    #[must_use]
    pub fn build(self) -> RuntimeContext {
        let stripes = self.config.lock_stripes;
        let records = self
            .records
            .unwrap_or_else(|| Arc::new(InMemoryHandlerRecordStore::with_stripes(stripes)));
        let context = RuntimeContext {
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            registry: Arc::new(AggregateRegistry::new()),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(InMemoryEventStore::with_stripes(stripes))),
            snapshots: self
                .snapshots
                .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::with_stripes(stripes))),
            published: self
                .published
                .unwrap_or_else(|| Arc::new(InMemoryPublishedVersionStore::with_stripes(stripes))),
            policy: self.config.snapshot_policy(),
            cache: Arc::new(MemoryCache::new(self.config.caching_enabled, stripes)),
            results: Arc::new(CommandResultManager::new(self.config.command_timeout())),
            invoker: Arc::new(HandlerInvoker::new(records)),
            config: self.config,
        };
        info!(
            caching_enabled = context.config.caching_enabled,
            snapshot_threshold = ?context.config.snapshot_threshold,
            lock_stripes = stripes,
            "runtime context built"
        );
        context
    }
}

impl std::fmt::Debug for RuntimeContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContextBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
