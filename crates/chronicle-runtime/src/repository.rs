//! Aggregate repository: snapshot-assisted load and idempotent save.

use std::sync::Arc;

use chronicle_core::aggregate::{AggregateImage, AggregateRoot, AggregateState, ApplyTable};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::EventEnvelope;
use chronicle_core::identity::SourceKey;
use chronicle_core::snapshot::SnapshotPolicy;
use chronicle_core::store::{EventStore, EventsFactory, Snapshot, SnapshotStore, StoredEvent};
use tracing::{debug, info, instrument, warn};

use crate::cache::MemoryCache;

/// Result of [`Repository::save`].
#[derive(Debug)]
pub enum SaveOutcome<E> {
    /// The pending events were committed. Holds every drained event,
    /// notifications included, in raise order.
    Committed {
        /// Events to publish.
        events: Vec<EventEnvelope<E>>,
    },
    /// The correlation id had already been committed for this aggregate;
    /// nothing was written.
    AlreadyApplied,
}

impl<E> SaveOutcome<E> {
    /// Whether this save wrote events.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// The committed events (empty for `AlreadyApplied`).
    #[must_use]
    pub fn events(&self) -> &[EventEnvelope<E>] {
        match self {
            Self::Committed { events } => events,
            Self::AlreadyApplied => &[],
        }
    }
}

/// Loads and persists aggregates of one state type.
pub struct Repository<S: AggregateState> {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    policy: Arc<dyn SnapshotPolicy>,
    cache: Arc<MemoryCache>,
    clock: Arc<dyn Clock>,
    table: Arc<ApplyTable<S>>,
}

impl<S: AggregateState> Repository<S> {
    /// Creates a repository over the given collaborators.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        policy: Arc<dyn SnapshotPolicy>,
        cache: Arc<MemoryCache>,
        clock: Arc<dyn Clock>,
        table: Arc<ApplyTable<S>>,
    ) -> Self {
        Self {
            events,
            snapshots,
            policy,
            cache,
            clock,
            table,
        }
    }

    /// Returns a fresh, unsaved aggregate with identity `id`.
    #[must_use]
    pub fn create(&self, id: impl Into<String>) -> AggregateRoot<S> {
        AggregateRoot::new(id, Arc::clone(&self.table))
    }

    /// The clock events raised through this repository's callers should use.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Loads the aggregate `id`, or `None` if it has neither events nor a
    /// snapshot.
    ///
    /// The cache or the latest snapshot provides the starting point; events
    /// after it are replayed on top.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EventSourcedConflict` or
    /// `DomainError::EventHandlerNotFound` if replay fails,
    /// `DomainError::Serialization` for unreadable events or snapshots, and
    /// store errors as they occur.
    #[instrument(skip(self), fields(aggregate_type = S::AGGREGATE_TYPE))]
    pub async fn find(&self, id: &str) -> Result<Option<AggregateRoot<S>>, DomainError> {
        let key = SourceKey::new(S::AGGREGATE_TYPE, id);
        let cache_key = key.to_string();

        let cached = self.cache.get::<AggregateImage<S>>(&cache_key)?;
        let from_cache = cached.is_some();
        let base = match cached {
            Some(image) => Some(image),
            None => self.load_snapshot(&key).await?,
        };

        let base_version = base.as_ref().map_or(0, |image| image.version);
        let tail = self.events.find_after_version(&key, base_version).await?;
        if base.is_none() && tail.is_empty() {
            debug!(aggregate_id = %key, "aggregate not found");
            return Ok(None);
        }

        let mut aggregate = match base {
            Some(image) => AggregateRoot::from_image(image, Arc::clone(&self.table)),
            None => AggregateRoot::new(id, Arc::clone(&self.table)),
        };
        let history = tail
            .iter()
            .map(EventEnvelope::<S::Event>::from_stored)
            .collect::<Result<Vec<_>, _>>()?;
        aggregate.load_from_history(&history)?;

        if !from_cache || !tail.is_empty() {
            self.cache.set(&aggregate.image()?, &cache_key)?;
        }
        debug!(
            aggregate_id = %key,
            version = aggregate.version(),
            replayed = tail.len(),
            from_cache,
            "loaded aggregate"
        );
        Ok(Some(aggregate))
    }

    /// Like [`find`](Self::find), failing when the aggregate does not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EntityNotFound` if there is nothing to load,
    /// plus every error `find` can return.
    pub async fn get(&self, id: &str) -> Result<AggregateRoot<S>, DomainError> {
        self.find(id)
            .await?
            .ok_or_else(|| DomainError::EntityNotFound {
                aggregate_type: S::AGGREGATE_TYPE.to_owned(),
                aggregate_id: id.to_owned(),
            })
    }

    /// Appends the aggregate's pending events under `correlation_id`.
    ///
    /// On commit the pending buffer is drained into the returned outcome,
    /// the cache is refreshed and a snapshot is cut if the policy asks for
    /// one. A repeated `correlation_id` is a no-op that still clears the
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if another writer advanced
    /// the stream first, `DomainError::Validation` if the aggregate has no
    /// identity, and store or serialization errors as they occur.
    #[instrument(
        skip(self, aggregate),
        fields(aggregate_type = S::AGGREGATE_TYPE, aggregate_id = aggregate.aggregate_id())
    )]
    pub async fn save(
        &self,
        aggregate: &mut AggregateRoot<S>,
        correlation_id: &str,
    ) -> Result<SaveOutcome<S::Event>, DomainError> {
        let key = aggregate.key()?;
        let cache_key = key.to_string();

        let pending = aggregate.pending_events();
        let factory: EventsFactory<'_> = Box::new(move || {
            pending
                .iter()
                .filter(|event| event.version().is_some())
                .map(|event| event.to_stored(S::AGGREGATE_TYPE, correlation_id))
                .collect::<Result<Vec<StoredEvent>, _>>()
        });

        let saved = match self.events.save(&key, correlation_id, factory).await {
            Ok(saved) => saved,
            Err(err) => {
                if matches!(err, DomainError::ConcurrencyConflict { .. }) {
                    self.cache.remove::<AggregateImage<S>>(&cache_key)?;
                }
                warn!(aggregate_id = %key, correlation_id, error = %err, "save failed");
                return Err(err);
            }
        };

        if !saved {
            aggregate.clear_events();
            self.cache.remove::<AggregateImage<S>>(&cache_key)?;
            info!(aggregate_id = %key, correlation_id, "command already applied, nothing saved");
            return Ok(SaveOutcome::AlreadyApplied);
        }

        let events = aggregate.pending_events().to_vec();
        aggregate.clear_events();
        let image = aggregate.image()?;
        self.cache.set(&image, &cache_key)?;
        info!(
            aggregate_id = %key,
            correlation_id,
            version = image.version,
            events = events.len(),
            "saved aggregate"
        );

        if self
            .policy
            .should_create_snapshot(S::AGGREGATE_TYPE, image.version)
        {
            self.store_snapshot(key, &image).await;
        }
        Ok(SaveOutcome::Committed { events })
    }

    /// Removes the aggregate's events, snapshots and cache entry.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the aggregate has no identity,
    /// and store errors as they occur.
    #[instrument(skip(self, aggregate), fields(aggregate_type = S::AGGREGATE_TYPE))]
    pub async fn delete(&self, aggregate: &AggregateRoot<S>) -> Result<(), DomainError> {
        let key = aggregate.key()?;
        self.cache.remove::<AggregateImage<S>>(&key.to_string())?;
        self.events.remove_all(&key).await?;
        self.snapshots.remove_all(&key).await?;
        info!(aggregate_id = %key, "deleted aggregate");
        Ok(())
    }

    async fn load_snapshot(
        &self,
        key: &SourceKey,
    ) -> Result<Option<AggregateImage<S>>, DomainError> {
        let Some(snapshot) = self.snapshots.find(key, u64::MAX).await? else {
            return Ok(None);
        };
        let image: AggregateImage<S> = serde_json::from_slice(&snapshot.data).map_err(|e| {
            DomainError::Serialization(format!(
                "snapshot of {key} at version {} failed to deserialize: {e}",
                snapshot.version
            ))
        })?;
        debug!(aggregate_id = %key, version = image.version, "restored snapshot");
        Ok(Some(image))
    }

    /// Snapshots are an optimization; a failure here never fails the save.
    async fn store_snapshot(&self, key: SourceKey, image: &AggregateImage<S>) {
        let data = match serde_json::to_vec(image) {
            Ok(data) => data,
            Err(err) => {
                warn!(aggregate_id = %key, error = %err, "snapshot serialization failed");
                return;
            }
        };
        let snapshot = Snapshot {
            key,
            version: image.version,
            data,
            timestamp: self.clock.now(),
        };
        let key = snapshot.key.clone();
        let version = snapshot.version;
        match self.snapshots.save(snapshot).await {
            Ok(()) => debug!(aggregate_id = %key, version, "snapshot stored"),
            Err(err) => warn!(aggregate_id = %key, version, error = %err, "snapshot store failed"),
        }
    }
}

impl<S: AggregateState> std::fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate_type", &S::AGGREGATE_TYPE)
            .field("caching", &self.cache.is_enabled())
            .finish_non_exhaustive()
    }
}
