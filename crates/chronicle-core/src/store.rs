//! Storage boundaries: events, snapshots, handler records and published
//! versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::identity::SourceKey;

/// Stored representation of a versioned domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate stream this event belongs to.
    pub key: SourceKey,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Version within the aggregate stream (1-based).
    pub version: u64,
    /// Id of the command that produced this event.
    pub correlation_id: String,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Lazily materializes the events of a save. Only invoked when the
/// correlation id has not been seen for the stream yet.
pub type EventsFactory<'a> =
    Box<dyn FnOnce() -> Result<Vec<StoredEvent>, DomainError> + Send + 'a>;

/// Append-only per-aggregate event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends the events produced by `events` to the stream of `key`,
    /// tagged with `correlation_id`.
    ///
    /// Returns `Ok(false)` without invoking `events` if the stream already
    /// holds events for `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the first materialized
    /// event is not exactly one past the stream's current version.
    async fn save(
        &self,
        key: &SourceKey,
        correlation_id: &str,
        events: EventsFactory<'_>,
    ) -> Result<bool, DomainError>;

    /// Returns the events of `key` tagged with `correlation_id`.
    async fn find_by_correlation(
        &self,
        key: &SourceKey,
        correlation_id: &str,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Returns the events of `key` with `version > after_version`, strictly
    /// ascending by version.
    async fn find_after_version(
        &self,
        key: &SourceKey,
        after_version: u64,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Purges every event of `key`.
    async fn remove_all(&self, key: &SourceKey) -> Result<(), DomainError>;
}

/// A serialized checkpoint of aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub key: SourceKey,
    /// Aggregate version captured by `data`.
    pub version: u64,
    /// Serialized aggregate state.
    pub data: Vec<u8>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// Storage for aggregate snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the latest snapshot of `key` whose version is at most
    /// `max_version`.
    async fn find(&self, key: &SourceKey, max_version: u64)
    -> Result<Option<Snapshot>, DomainError>;

    /// Stores a snapshot. Older snapshots are superseded, not deleted.
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError>;

    /// Drops every snapshot of `key`.
    async fn remove_all(&self, key: &SourceKey) -> Result<(), DomainError>;
}

/// Marker that a handler already produced its side effects for a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerRecord {
    /// Id of the handled message.
    pub message_id: String,
    /// Type name of the handled message.
    pub message_type: String,
    /// Type name of the handler.
    pub handler_type: String,
}

impl HandlerRecord {
    /// Creates a new handler record.
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        message_type: impl Into<String>,
        handler_type: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: message_type.into(),
            handler_type: handler_type.into(),
        }
    }
}

/// State of a (message, handler) pair after a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerClaim {
    /// The caller now owns the execution and must `complete` or `release`
    /// the record.
    Acquired,
    /// Another worker owns an unfinished execution.
    InProgress,
    /// The handler already completed for this message.
    Completed,
}

/// Idempotency ledger of (message, handler) executions.
///
/// Workers sharing a store gate on [`HandlerRecordStore::try_claim`]: at
/// most one of them is handed [`HandlerClaim::Acquired`] for a record until
/// that claim is released.
#[async_trait]
pub trait HandlerRecordStore: Send + Sync {
    /// Inserts `record` as completed. Returns `false` if it was already
    /// completed; the check and insert are a single atomic step.
    async fn add_handler_info(&self, record: &HandlerRecord) -> Result<bool, DomainError>;

    /// Returns whether `record` has completed.
    async fn is_handler_info_exist(&self, record: &HandlerRecord) -> Result<bool, DomainError>;

    /// Atomically claims `record` unless it is already claimed or completed.
    async fn try_claim(&self, record: &HandlerRecord) -> Result<HandlerClaim, DomainError>;

    /// Marks a claimed `record` as completed.
    async fn complete(&self, record: &HandlerRecord) -> Result<(), DomainError>;

    /// Drops an unfinished claim on `record` so a later delivery may retry.
    /// Completed records are left alone.
    async fn release(&self, record: &HandlerRecord) -> Result<(), DomainError>;
}

/// Tracks, per aggregate, the highest event version handed to subscribers.
#[async_trait]
pub trait PublishedVersionStore: Send + Sync {
    /// Advances the published version of `key` to `end_version` after the
    /// events `start_version..=end_version` were published.
    ///
    /// Returns `false` and leaves the record untouched unless the range
    /// continues the current published version without a gap.
    async fn add_or_update_published_version(
        &self,
        key: &SourceKey,
        start_version: u64,
        end_version: u64,
    ) -> Result<bool, DomainError>;

    /// Returns the published version of `key`, or `0` if nothing was
    /// published yet.
    async fn get_published_version(&self, key: &SourceKey) -> Result<u64, DomainError>;
}
