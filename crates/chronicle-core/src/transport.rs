//! Outbound command transport boundary.
//!
//! The runtime never talks to a broker directly. It builds
//! [`CommandEnvelope`]s and hands them to a [`MessageSender`]; metadata and
//! routing keys come from pluggable providers.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::command::{CommandEnvelope, Message};
use crate::error::DomainError;

/// Delivers command envelopes to the wire.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends `envelopes` as one batch.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transport` if the batch could not be delivered.
    async fn send_async(&self, envelopes: Vec<CommandEnvelope>) -> Result<(), DomainError>;
}

/// Supplies per-command envelope metadata.
pub trait MetadataProvider: Send + Sync {
    /// Metadata for `message`.
    fn metadata(&self, message: &dyn Message) -> HashMap<String, String>;
}

/// Supplies the routing key of a command.
pub trait RoutingKeyProvider: Send + Sync {
    /// Routing key for `message`.
    fn routing_key(&self, message: &dyn Message) -> String;
}

/// Attaches no metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyMetadataProvider;

impl MetadataProvider for EmptyMetadataProvider {
    fn metadata(&self, _message: &dyn Message) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Routes every command by its message type.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageTypeRoutingKeyProvider;

impl RoutingKeyProvider for MessageTypeRoutingKeyProvider {
    fn routing_key(&self, message: &dyn Message) -> String {
        message.message_type().to_owned()
    }
}
