//! Aggregate root abstraction.
//!
//! An aggregate's state lives in a plain [`AggregateState`] value. The
//! [`AggregateRoot`] wrapper owns identity, version and the pending-event
//! buffer, and routes every event through the state type's [`ApplyTable`].
//! Tables are built once per state type and shared through the
//! [`AggregateRegistry`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{DomainError, ReplayConflict};
use crate::event::{DomainEvent, EventEnvelope, EventMetadata};
use crate::identity::SourceKey;

/// State of an event-sourced aggregate type.
pub trait AggregateState:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Aggregate type name, the first half of every [`SourceKey`].
    const AGGREGATE_TYPE: &'static str;

    /// The event type this aggregate raises and replays.
    type Event: DomainEvent;

    /// Registers an apply function for every versioned event type.
    fn register(table: &mut ApplyTable<Self>);
}

type ApplyFn<S> = Box<dyn Fn(&mut S, &<S as AggregateState>::Event) + Send + Sync>;

/// Event-type to apply-function table for one aggregate type.
pub struct ApplyTable<S: AggregateState> {
    handlers: HashMap<&'static str, ApplyFn<S>>,
}

impl<S: AggregateState> ApplyTable<S> {
    /// Builds the table by running `S::register`.
    #[must_use]
    pub fn build() -> Self {
        let mut table = Self {
            handlers: HashMap::new(),
        };
        S::register(&mut table);
        table
    }

    /// Registers `apply` for events of `event_type`, replacing any earlier
    /// registration.
    pub fn on<F>(&mut self, event_type: &'static str, apply: F) -> &mut Self
    where
        F: Fn(&mut S, &S::Event) + Send + Sync + 'static,
    {
        self.handlers.insert(event_type, Box::new(apply));
        self
    }

    /// Returns whether an apply function is registered for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    fn get(&self, event_type: &str) -> Option<&ApplyFn<S>> {
        self.handlers.get(event_type)
    }
}

impl<S: AggregateState> fmt::Debug for ApplyTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut event_types: Vec<_> = self.handlers.keys().collect();
        event_types.sort();
        f.debug_struct("ApplyTable")
            .field("aggregate_type", &S::AGGREGATE_TYPE)
            .field("event_types", &event_types)
            .finish()
    }
}

/// Cache of apply tables, one per aggregate state type.
#[derive(Default)]
pub struct AggregateRegistry {
    tables: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl AggregateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the apply table for `S`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the registry lock is
    /// poisoned.
    pub fn table<S: AggregateState>(&self) -> Result<Arc<ApplyTable<S>>, DomainError> {
        let type_id = TypeId::of::<S>();
        {
            let tables = self.tables.read().map_err(|_| poisoned())?;
            if let Some(table) = tables.get(&type_id) {
                return downcast::<S>(Arc::clone(table));
            }
        }

        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let table = tables.entry(type_id).or_insert_with(|| {
            tracing::debug!(aggregate_type = S::AGGREGATE_TYPE, "building apply table");
            Arc::new(ApplyTable::<S>::build())
        });
        downcast::<S>(Arc::clone(table))
    }

    /// Returns whether `S` has been registered.
    #[must_use]
    pub fn is_registered<S: AggregateState>(&self) -> bool {
        self.tables
            .read()
            .is_ok_and(|tables| tables.contains_key(&TypeId::of::<S>()))
    }
}

impl fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.tables.read().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("AggregateRegistry")
            .field("registered_types", &count)
            .finish()
    }
}

fn poisoned() -> DomainError {
    DomainError::Infrastructure("aggregate registry lock poisoned".into())
}

fn downcast<S: AggregateState>(
    table: Arc<dyn Any + Send + Sync>,
) -> Result<Arc<ApplyTable<S>>, DomainError> {
    table.downcast::<ApplyTable<S>>().map_err(|_| {
        DomainError::Infrastructure(format!(
            "apply table for {} has an unexpected type",
            S::AGGREGATE_TYPE
        ))
    })
}

/// Serializable image of an aggregate: identity, version and state.
///
/// Used as the snapshot blob and as the cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Serialize", deserialize = "S: DeserializeOwned"))]
pub struct AggregateImage<S> {
    /// Aggregate identifier.
    pub aggregate_id: String,
    /// Version of the last applied event.
    pub version: u64,
    /// Aggregate state after that event.
    pub state: S,
}

/// A versioned, event-sourced aggregate instance.
pub struct AggregateRoot<S: AggregateState> {
    id: Option<String>,
    version: u64,
    state: S,
    pending: Vec<EventEnvelope<S::Event>>,
    table: Arc<ApplyTable<S>>,
}

impl<S: AggregateState> AggregateRoot<S> {
    /// Creates a fresh aggregate with identity `id` at version 0.
    #[must_use]
    pub fn new(id: impl Into<String>, table: Arc<ApplyTable<S>>) -> Self {
        Self {
            id: Some(id.into()),
            version: 0,
            state: S::default(),
            pending: Vec::new(),
            table,
        }
    }

    /// Creates an aggregate without identity. It adopts the source id of
    /// the first replayed event.
    #[must_use]
    pub fn unidentified(table: Arc<ApplyTable<S>>) -> Self {
        Self {
            id: None,
            version: 0,
            state: S::default(),
            pending: Vec::new(),
            table,
        }
    }

    /// Restores an aggregate from a snapshot or cache image.
    #[must_use]
    pub fn from_image(image: AggregateImage<S>, table: Arc<ApplyTable<S>>) -> Self {
        Self {
            id: Some(image.aggregate_id),
            version: image.version,
            state: image.state,
            pending: Vec::new(),
            table,
        }
    }

    /// Returns the aggregate identifier, once established.
    #[must_use]
    pub fn aggregate_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the source key of this aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if no identity is established yet.
    pub fn key(&self) -> Result<SourceKey, DomainError> {
        self.id
            .as_ref()
            .map(|id| SourceKey::new(S::AGGREGATE_TYPE, id.clone()))
            .ok_or_else(|| {
                DomainError::Validation(format!(
                    "{} aggregate has no identity",
                    S::AGGREGATE_TYPE
                ))
            })
    }

    /// Returns the version of the last applied event (0 if none).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Returns a serializable copy of identity, version and state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if no identity is established yet.
    pub fn image(&self) -> Result<AggregateImage<S>, DomainError> {
        Ok(AggregateImage {
            aggregate_id: self.key()?.aggregate_id,
            version: self.version,
            state: self.state.clone(),
        })
    }

    /// Applies `event` to the state and buffers it for persistence.
    ///
    /// Versioned events are stamped with `version + 1` and require a
    /// registered apply function. Non-versioned events are applied if a
    /// function exists and buffered either way.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EventHandlerNotFound` for an unregistered
    /// versioned event, or `DomainError::Validation` if the aggregate has
    /// no identity. The aggregate is unchanged on error.
    pub fn raise_event(&mut self, event: S::Event, clock: &dyn Clock) -> Result<(), DomainError> {
        let source_id = self.key()?.aggregate_id;
        let event_type = event.event_type();
        let version = event.is_versioned().then_some(self.version + 1);

        match self.table.get(event_type) {
            Some(apply) => apply(&mut self.state, &event),
            None if version.is_some() => return Err(self.handler_not_found(event_type)),
            None => {}
        }
        if let Some(version) = version {
            self.version = version;
        }

        self.pending.push(EventEnvelope {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: event_type.to_owned(),
                source_id,
                version,
                occurred_at: clock.now(),
            },
            payload: event,
        });
        Ok(())
    }

    /// Replays persisted events in order without buffering them.
    ///
    /// Non-versioned events are not part of the replay log and are skipped.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EventSourcedConflict` if an event's version is
    /// not exactly `version + 1` or its source id disagrees with the
    /// aggregate's identity, and `DomainError::EventHandlerNotFound` for an
    /// event type without an apply function.
    pub fn load_from_history<'a, I>(&mut self, events: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = &'a EventEnvelope<S::Event>>,
    {
        for event in events {
            let Some(version) = event.version() else {
                continue;
            };
            let source_id = &event.metadata.source_id;

            match &self.id {
                None => self.id = Some(source_id.clone()),
                Some(id) if id != source_id => {
                    return Err(self.conflict(ReplayConflict::SourceMismatch {
                        expected: id.clone(),
                        found: source_id.clone(),
                    }));
                }
                Some(_) => {}
            }

            if version != self.version + 1 {
                return Err(self.conflict(ReplayConflict::VersionGap {
                    expected: self.version + 1,
                    found: version,
                }));
            }

            let apply = self
                .table
                .get(event.payload.event_type())
                .ok_or_else(|| self.handler_not_found(event.payload.event_type()))?;
            apply(&mut self.state, &event.payload);
            self.version = version;
        }
        Ok(())
    }

    /// Returns events raised since the last successful persist.
    #[must_use]
    pub fn pending_events(&self) -> &[EventEnvelope<S::Event>] {
        &self.pending
    }

    /// Clears the pending buffer after persistence.
    pub fn clear_events(&mut self) {
        self.pending.clear();
    }

    fn conflict(&self, reason: ReplayConflict) -> DomainError {
        DomainError::EventSourcedConflict {
            aggregate_id: self.id.clone().unwrap_or_default(),
            reason,
        }
    }

    fn handler_not_found(&self, event_type: &str) -> DomainError {
        DomainError::EventHandlerNotFound {
            aggregate_type: S::AGGREGATE_TYPE.to_owned(),
            event_type: event_type.to_owned(),
        }
    }
}

impl<S: AggregateState + fmt::Debug> fmt::Debug for AggregateRoot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("aggregate_type", &S::AGGREGATE_TYPE)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    struct TestClock;

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented { by: u32 },
        Reset,
        Observed,
        Frozen,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Incremented { .. } => "counter.incremented",
                Self::Reset => "counter.reset",
                Self::Observed => "counter.observed",
                Self::Frozen => "counter.frozen",
            }
        }

        fn is_versioned(&self) -> bool {
            !matches!(self, Self::Observed)
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        total: u32,
    }

    impl AggregateState for Counter {
        const AGGREGATE_TYPE: &'static str = "counter";
        type Event = CounterEvent;

        fn register(table: &mut ApplyTable<Self>) {
            table
                .on("counter.incremented", |state, event| {
                    if let CounterEvent::Incremented { by } = event {
                        state.total += by;
                    }
                })
                .on("counter.reset", |state, _| state.total = 0);
        }
    }

    fn table() -> Arc<ApplyTable<Counter>> {
        Arc::new(ApplyTable::build())
    }

    fn history(source_id: &str, versions: &[u64]) -> Vec<EventEnvelope<CounterEvent>> {
        versions
            .iter()
            .map(|&version| EventEnvelope {
                metadata: EventMetadata {
                    event_id: Uuid::new_v4(),
                    event_type: "counter.incremented".to_owned(),
                    source_id: source_id.to_owned(),
                    version: Some(version),
                    occurred_at: TestClock.now(),
                },
                payload: CounterEvent::Incremented { by: 1 },
            })
            .collect()
    }

    #[test]
    fn test_raise_event_assigns_contiguous_versions() {
        // Arrange
        let mut counter = AggregateRoot::new("C1", table());

        // Act
        for _ in 0..5 {
            counter
                .raise_event(CounterEvent::Incremented { by: 2 }, &TestClock)
                .unwrap();
        }

        // Assert
        assert_eq!(counter.version(), 5);
        assert_eq!(counter.state().total, 10);
        let versions: Vec<_> = counter
            .pending_events()
            .iter()
            .map(EventEnvelope::version)
            .collect();
        assert_eq!(versions, vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);
    }

    #[test]
    fn test_fresh_aggregate_is_at_version_zero() {
        let counter = AggregateRoot::new("C1", table());

        assert_eq!(counter.version(), 0);
        assert!(counter.pending_events().is_empty());
    }

    #[test]
    fn test_raise_event_stamps_source_and_timestamp() {
        let mut counter = AggregateRoot::new("C1", table());

        counter.raise_event(CounterEvent::Reset, &TestClock).unwrap();

        let metadata = &counter.pending_events()[0].metadata;
        assert_eq!(metadata.source_id, "C1");
        assert_eq!(metadata.event_type, "counter.reset");
        assert_eq!(metadata.occurred_at, TestClock.now());
    }

    #[test]
    fn test_raise_unregistered_versioned_event_fails_without_side_effects() {
        // Arrange
        let mut counter = AggregateRoot::new("C1", table());

        // Act
        let result = counter.raise_event(CounterEvent::Frozen, &TestClock);

        // Assert
        match result.unwrap_err() {
            DomainError::EventHandlerNotFound {
                aggregate_type,
                event_type,
            } => {
                assert_eq!(aggregate_type, "counter");
                assert_eq!(event_type, "counter.frozen");
            }
            other => panic!("expected EventHandlerNotFound, got {other:?}"),
        }
        assert_eq!(counter.version(), 0);
        assert!(counter.pending_events().is_empty());
    }

    #[test]
    fn test_raise_notification_without_handler_keeps_version() {
        // Arrange
        let mut counter = AggregateRoot::new("C1", table());
        counter
            .raise_event(CounterEvent::Incremented { by: 1 }, &TestClock)
            .unwrap();

        // Act
        counter.raise_event(CounterEvent::Observed, &TestClock).unwrap();

        // Assert
        assert_eq!(counter.version(), 1);
        assert_eq!(counter.pending_events().len(), 2);
        assert_eq!(counter.pending_events()[1].version(), None);
    }

    #[test]
    fn test_raise_event_requires_identity() {
        let mut counter = AggregateRoot::unidentified(table());

        let result = counter.raise_event(CounterEvent::Reset, &TestClock);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_load_from_history_replays_contiguous_versions() {
        // Arrange
        let mut counter = AggregateRoot::new("C1", table());

        // Act
        counter.load_from_history(&history("C1", &[1, 2, 3])).unwrap();

        // Assert
        assert_eq!(counter.version(), 3);
        assert_eq!(counter.state().total, 3);
        assert!(counter.pending_events().is_empty());
    }

    #[test]
    fn test_load_from_history_rejects_version_gap() {
        // Arrange
        let mut counter = AggregateRoot::new("C1", table());

        // Act
        let result = counter.load_from_history(&history("C1", &[1, 3]));

        // Assert
        match result.unwrap_err() {
            DomainError::EventSourcedConflict { aggregate_id, reason } => {
                assert_eq!(aggregate_id, "C1");
                assert_eq!(
                    reason,
                    ReplayConflict::VersionGap {
                        expected: 2,
                        found: 3
                    }
                );
            }
            other => panic!("expected EventSourcedConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_history_rejects_foreign_source() {
        let mut counter = AggregateRoot::new("C1", table());

        let result = counter.load_from_history(&history("C2", &[1]));

        assert!(matches!(
            result,
            Err(DomainError::EventSourcedConflict {
                reason: ReplayConflict::SourceMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_unidentified_aggregate_adopts_first_source_id() {
        // Arrange
        let mut counter = AggregateRoot::unidentified(table());

        // Act
        counter.load_from_history(&history("C7", &[1, 2])).unwrap();

        // Assert
        assert_eq!(counter.aggregate_id(), Some("C7"));
        assert_eq!(counter.key().unwrap(), SourceKey::new("counter", "C7"));
    }

    #[test]
    fn test_replay_continues_from_image_version() {
        // Arrange
        let image = AggregateImage {
            aggregate_id: "C1".to_owned(),
            version: 2,
            state: Counter { total: 40 },
        };
        let mut counter = AggregateRoot::from_image(image, table());

        // Act
        counter.load_from_history(&history("C1", &[3])).unwrap();

        // Assert
        assert_eq!(counter.version(), 3);
        assert_eq!(counter.state().total, 41);
    }

    #[test]
    fn test_clear_events_empties_pending_buffer() {
        let mut counter = AggregateRoot::new("C1", table());
        counter.raise_event(CounterEvent::Reset, &TestClock).unwrap();

        counter.clear_events();

        assert!(counter.pending_events().is_empty());
        assert_eq!(counter.version(), 1);
    }

    #[test]
    fn test_registry_builds_table_once_per_type() {
        // Arrange
        let registry = AggregateRegistry::new();
        assert!(!registry.is_registered::<Counter>());

        // Act
        let first = registry.table::<Counter>().unwrap();
        let second = registry.table::<Counter>().unwrap();

        // Assert
        assert!(registry.is_registered::<Counter>());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.handles("counter.incremented"));
        assert!(!first.handles("counter.frozen"));
    }
}
