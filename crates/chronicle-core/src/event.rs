//! Domain event abstractions.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::identity::SourceKey;
use crate::store::StoredEvent;

/// Trait that all domain event payloads implement.
///
/// Versioned events (the default) form an aggregate's replay log and must
/// have an apply function registered for their type. Non-versioned events
/// are side notifications: they are never persisted to the event store and
/// may be raised without an apply function.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Returns the event type name (used for apply dispatch and storage).
    fn event_type(&self) -> &'static str;

    /// Whether this event occupies a position in the aggregate's stream.
    fn is_versioned(&self) -> bool {
        true
    }
}

/// Metadata attached to every raised event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Identifier of the aggregate that raised the event.
    pub source_id: String,
    /// Position in the aggregate stream (1-based); `None` for notifications.
    pub version: Option<u64>,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// A raised or replayed event together with its metadata.
#[derive(Debug, Clone)]
pub struct EventEnvelope<E> {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub payload: E,
}

impl<E: DomainEvent> EventEnvelope<E> {
    /// Returns the event's stream version, if it is versioned.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.metadata.version
    }

    /// Converts this event into a stream record tagged with `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a non-versioned event, or
    /// `DomainError::Serialization` if the payload cannot be serialized.
    pub fn to_stored(
        &self,
        aggregate_type: &str,
        correlation_id: &str,
    ) -> Result<StoredEvent, DomainError> {
        let version = self.metadata.version.ok_or_else(|| {
            DomainError::Validation(format!(
                "event {} is not versioned and cannot be stored",
                self.metadata.event_type
            ))
        })?;
        Ok(StoredEvent {
            event_id: self.metadata.event_id,
            key: SourceKey::new(aggregate_type, self.metadata.source_id.clone()),
            event_type: self.metadata.event_type.clone(),
            payload: serde_json::to_value(&self.payload)?,
            version,
            correlation_id: correlation_id.to_owned(),
            occurred_at: self.metadata.occurred_at,
        })
    }

    /// Rebuilds an event from its stream record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not
    /// deserialize into `E`.
    pub fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
        let payload: E = serde_json::from_value(stored.payload.clone()).map_err(|e| {
            DomainError::Serialization(format!(
                "event {} at version {} of {} failed to deserialize: {e}",
                stored.event_type, stored.version, stored.key
            ))
        })?;
        Ok(Self {
            metadata: EventMetadata {
                event_id: stored.event_id,
                event_type: stored.event_type.clone(),
                source_id: stored.key.aggregate_id.clone(),
                version: Some(stored.version),
                occurred_at: stored.occurred_at,
            },
            payload,
        })
    }
}
