//! Domain error types.

use thiserror::Error;

/// Why a replayed event could not be applied to an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayConflict {
    /// The event's version is not exactly one past the aggregate's version.
    #[error("expected event version {expected}, found {found}")]
    VersionGap {
        /// The version the aggregate expected next.
        expected: u64,
        /// The version carried by the event.
        found: u64,
    },

    /// The event belongs to a different aggregate instance.
    #[error("event source {found} does not match aggregate {expected}")]
    SourceMismatch {
        /// The aggregate's established identity.
        expected: String,
        /// The source id carried by the event.
        found: String,
    },
}

/// Top-level domain error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Replay met an out-of-sequence or foreign event.
    #[error("event sourced conflict on aggregate {aggregate_id}: {reason}")]
    EventSourcedConflict {
        /// The aggregate being replayed.
        aggregate_id: String,
        /// What went wrong.
        reason: ReplayConflict,
    },

    /// A versioned event has no registered apply function.
    #[error("no apply function registered for event {event_type} on aggregate type {aggregate_type}")]
    EventHandlerNotFound {
        /// The aggregate type raising the event.
        aggregate_type: String,
        /// The unhandled event type.
        event_type: String,
    },

    /// No events or snapshot exist for the requested aggregate.
    #[error("entity not found: {aggregate_type}/{aggregate_id}")]
    EntityNotFound {
        /// The requested aggregate type.
        aggregate_type: String,
        /// The requested aggregate id.
        aggregate_id: String,
    },

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: String,
        /// The version the writer expected the stream to be at.
        expected: u64,
        /// The version the stream was actually at.
        actual: u64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An event payload or aggregate state could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// The message transport rejected or lost a send.
    #[error("transport error: {0}")]
    Transport(String),

    /// Another worker holds an unreleased claim on this message and handler.
    #[error("handler {handler_type} is already running for message {message_id}")]
    HandlerInProgress {
        /// The message being handled.
        message_id: String,
        /// The handler holding the claim.
        handler_type: String,
    },

    /// No reply arrived for a command before its deadline. The command may
    /// still have executed.
    #[error("timed out waiting for the result of command {command_id}")]
    Timeout {
        /// The command that was awaited.
        command_id: String,
    },
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sourced_conflict_displays_version_gap() {
        let err = DomainError::EventSourcedConflict {
            aggregate_id: "user/U1".into(),
            reason: ReplayConflict::VersionGap {
                expected: 2,
                found: 4,
            },
        };

        assert_eq!(
            err.to_string(),
            "event sourced conflict on aggregate user/U1: expected event version 2, found 4"
        );
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();

        let err = DomainError::from(json_err);

        assert!(matches!(err, DomainError::Serialization(_)));
    }
}
