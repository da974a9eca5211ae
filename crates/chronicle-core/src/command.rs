//! Message and command abstractions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trait that all dispatched messages implement.
pub trait Message: Send + Sync + std::fmt::Debug {
    /// Unique id of this message instance (stable across redelivery).
    fn message_id(&self) -> &str;

    /// The type name for this message (for logging/routing/idempotency).
    fn message_type(&self) -> &'static str;
}

/// A message asking an aggregate to change. Its id doubles as the
/// correlation id of the events it produces.
pub trait Command: Message + Serialize {}

/// Outbound wire form of a command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    id: String,
    body: serde_json::Value,
    metadata: HashMap<String, String>,
    routing_key: String,
    created_time: DateTime<Utc>,
}

impl CommandEnvelope {
    /// Creates a new envelope.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        body: serde_json::Value,
        metadata: HashMap<String, String>,
        routing_key: impl Into<String>,
        created_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            body,
            metadata,
            routing_key: routing_key.into(),
            created_time,
        }
    }

    /// The command id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The serialized command.
    #[must_use]
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Metadata supplied by the metadata provider.
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Routing key supplied by the routing key provider.
    #[must_use]
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// When the envelope was built.
    #[must_use]
    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }
}
