//! Test transports — mock `MessageSender` and provider implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::command::{CommandEnvelope, Message};
use chronicle_core::error::DomainError;
use chronicle_core::transport::{MessageSender, MetadataProvider, RoutingKeyProvider};

/// A sender that records every batch and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingSender {
    batches: Mutex<Vec<Vec<CommandEnvelope>>>,
}

impl RecordingSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every batch sent so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<CommandEnvelope>> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns every envelope sent so far, flattened across batches.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn envelopes(&self) -> Vec<CommandEnvelope> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_async(&self, envelopes: Vec<CommandEnvelope>) -> Result<(), DomainError> {
        self.batches.lock().unwrap().push(envelopes);
        Ok(())
    }
}

/// A sender that always fails with a transport error.
#[derive(Debug)]
pub struct FailingSender;

#[async_trait]
impl MessageSender for FailingSender {
    async fn send_async(&self, _envelopes: Vec<CommandEnvelope>) -> Result<(), DomainError> {
        Err(DomainError::Transport("broker unreachable".into()))
    }
}

/// Attaches the same metadata to every command.
#[derive(Debug, Default, Clone)]
pub struct StaticMetadataProvider(pub HashMap<String, String>);

impl StaticMetadataProvider {
    #[must_use]
    pub fn with(key: &str, value: &str) -> Self {
        Self(HashMap::from([(key.to_owned(), value.to_owned())]))
    }
}

impl MetadataProvider for StaticMetadataProvider {
    fn metadata(&self, _message: &dyn Message) -> HashMap<String, String> {
        self.0.clone()
    }
}

/// Routes every command to the same key.
#[derive(Debug, Clone)]
pub struct FixedRoutingKeyProvider(pub String);

impl RoutingKeyProvider for FixedRoutingKeyProvider {
    fn routing_key(&self, _message: &dyn Message) -> String {
        self.0.clone()
    }
}
