//! In-memory implementation of the `EventStore` trait.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::identity::SourceKey;
use chronicle_core::store::{EventStore, EventsFactory, StoredEvent};
use tracing::{debug, warn};

use crate::striped::{DEFAULT_STRIPES, Striped};

#[derive(Debug, Default)]
struct Stream {
    /// Ascending and contiguous by version, starting at 1.
    events: Vec<StoredEvent>,
    correlations: HashSet<String>,
}

impl Stream {
    fn version(&self) -> u64 {
        self.events.last().map_or(0, |e| e.version)
    }
}

/// Process-local event store. Streams are guarded by striped locks, so
/// appends to one aggregate are compare-and-append atomic while different
/// aggregates proceed in parallel.
#[derive(Debug)]
pub struct InMemoryEventStore {
    streams: Striped<HashMap<SourceKey, Stream>>,
}

impl InMemoryEventStore {
    /// Creates a store with the default number of lock stripes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Creates a store with `stripes` lock stripes.
    #[must_use]
    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            streams: Striped::new(stripes),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that `events` continue `key`'s stream at `current` without gaps.
fn check_append(key: &SourceKey, current: u64, events: &[StoredEvent]) -> Result<(), DomainError> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    if first.version != current + 1 {
        return Err(DomainError::ConcurrencyConflict {
            aggregate_id: key.to_string(),
            expected: first.version.saturating_sub(1),
            actual: current,
        });
    }
    for (expected, event) in (first.version..).zip(events) {
        if event.key != *key {
            return Err(DomainError::Validation(format!(
                "event {} belongs to {}, not {key}",
                event.event_id, event.key
            )));
        }
        if event.version != expected {
            return Err(DomainError::Validation(format!(
                "events for {key} are not contiguous: expected version {expected}, found {}",
                event.version
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(
        &self,
        key: &SourceKey,
        correlation_id: &str,
        events: EventsFactory<'_>,
    ) -> Result<bool, DomainError> {
        let mut streams = self.streams.lock(key)?;
        if streams
            .get(key)
            .is_some_and(|stream| stream.correlations.contains(correlation_id))
        {
            debug!(aggregate_id = %key, correlation_id, "events already persisted for command");
            return Ok(false);
        }

        let mut events = events()?;
        let current = streams.get(key).map_or(0, Stream::version);
        if let Err(err) = check_append(key, current, &events) {
            warn!(aggregate_id = %key, correlation_id, error = %err, "rejected append");
            return Err(err);
        }
        if events.is_empty() {
            return Ok(true);
        }

        for event in &mut events {
            correlation_id.clone_into(&mut event.correlation_id);
        }
        let stream = streams.entry(key.clone()).or_default();
        stream.correlations.insert(correlation_id.to_owned());
        stream.events.extend(events);
        debug!(aggregate_id = %key, correlation_id, version = stream.version(), "appended events");
        Ok(true)
    }

    async fn find_by_correlation(
        &self,
        key: &SourceKey,
        correlation_id: &str,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let streams = self.streams.lock(key)?;
        Ok(streams
            .get(key)
            .map(|stream| {
                stream
                    .events
                    .iter()
                    .filter(|e| e.correlation_id == correlation_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_after_version(
        &self,
        key: &SourceKey,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let streams = self.streams.lock(key)?;
        Ok(streams
            .get(key)
            .map(|stream| {
                stream
                    .events
                    .iter()
                    .filter(|e| e.version > after_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_all(&self, key: &SourceKey) -> Result<(), DomainError> {
        if self.streams.lock(key)?.remove(key).is_some() {
            debug!(aggregate_id = %key, "removed event stream");
        }
        Ok(())
    }
}
