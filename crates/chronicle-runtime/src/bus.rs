//! Command bus.
//!
//! `send` wraps commands into envelopes and hands them to the transport on
//! a background task. It never waits for the broker; delivery failures are
//! reported to the [`CommandResultManager`] instead of the caller.

use std::sync::Arc;

use chronicle_core::clock::Clock;
use chronicle_core::command::{Command, CommandEnvelope};
use chronicle_core::error::DomainError;
use chronicle_core::transport::{
    EmptyMetadataProvider, MessageSender, MessageTypeRoutingKeyProvider, MetadataProvider,
    RoutingKeyProvider,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::command_result::{CommandResultFuture, CommandResultManager, ReplyType};

/// Handle to a batch handed to the transport.
#[derive(Debug)]
pub struct Dispatch {
    command_ids: Vec<String>,
    delivery: JoinHandle<Result<(), DomainError>>,
}

impl Dispatch {
    /// Ids of the commands in the batch, in send order.
    #[must_use]
    pub fn command_ids(&self) -> &[String] {
        &self.command_ids
    }

    /// Waits for the transport to accept or reject the batch. Dropping the
    /// dispatch instead does not cancel delivery.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or `DomainError::Infrastructure` if
    /// the delivery task panicked.
    pub async fn delivered(self) -> Result<(), DomainError> {
        self.delivery
            .await
            .map_err(|e| DomainError::Infrastructure(format!("delivery task failed: {e}")))?
    }
}

/// Sends commands through a `MessageSender`.
#[derive(Clone)]
pub struct CommandBus {
    sender: Arc<dyn MessageSender>,
    metadata: Arc<dyn MetadataProvider>,
    routing: Arc<dyn RoutingKeyProvider>,
    results: Arc<CommandResultManager>,
    clock: Arc<dyn Clock>,
}

impl CommandBus {
    /// Creates a bus with no envelope metadata and message-type routing.
    #[must_use]
    pub fn new(
        sender: Arc<dyn MessageSender>,
        results: Arc<CommandResultManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sender,
            metadata: Arc::new(EmptyMetadataProvider),
            routing: Arc::new(MessageTypeRoutingKeyProvider),
            results,
            clock,
        }
    }

    #[must_use]
    pub fn with_metadata_provider(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_routing_key_provider(mut self, routing: Arc<dyn RoutingKeyProvider>) -> Self {
        self.routing = routing;
        self
    }

    /// Builds the envelope for `command`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the command cannot be
    /// serialized.
    pub fn envelope<C: Command>(&self, command: &C) -> Result<CommandEnvelope, DomainError> {
        Ok(CommandEnvelope::new(
            command.message_id(),
            serde_json::to_value(command)?,
            self.metadata.metadata(command),
            self.routing.routing_key(command),
            self.clock.now(),
        ))
    }

    /// Hands `commands` to the transport as one batch and returns at once.
    ///
    /// If delivery fails, pending results of these commands are failed with
    /// the transport error.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if called outside a Tokio
    /// runtime, or `DomainError::Serialization` if a command cannot be
    /// serialized. Nothing is sent in either case.
    #[instrument(skip_all, fields(batch = commands.len()))]
    pub fn send<C: Command>(&self, commands: &[C]) -> Result<Dispatch, DomainError> {
        let runtime = Handle::try_current().map_err(|err| {
            DomainError::Infrastructure(format!("command bus needs a Tokio runtime: {err}"))
        })?;
        let envelopes = commands
            .iter()
            .map(|command| self.envelope(command))
            .collect::<Result<Vec<_>, _>>()?;
        let command_ids: Vec<String> = envelopes.iter().map(|e| e.id().to_owned()).collect();

        let sender = Arc::clone(&self.sender);
        let results = Arc::clone(&self.results);
        let ids = command_ids.clone();
        let delivery = runtime.spawn(async move {
            match sender.send_async(envelopes).await {
                Ok(()) => {
                    debug!(commands = ids.len(), "command batch delivered");
                    Ok(())
                }
                Err(err) => {
                    warn!(error = %err, commands = ids.len(), "command batch delivery failed");
                    for id in &ids {
                        results.fail(id, err.clone());
                    }
                    Err(err)
                }
            }
        });

        info!(command_ids = ?command_ids, "commands sent");
        Ok(Dispatch {
            command_ids,
            delivery,
        })
    }

    /// Registers for `reply` on `command`, then sends it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the command cannot be
    /// serialized, or `DomainError::Infrastructure` if the result registry
    /// is unavailable or no Tokio runtime is running. The registration is
    /// failed with the same error.
    pub fn send_with_reply<C: Command>(
        &self,
        command: &C,
        reply: ReplyType,
    ) -> Result<CommandResultFuture, DomainError> {
        let future = self.results.register(command.message_id(), reply)?;
        if let Err(err) = self.send(std::slice::from_ref(command)) {
            self.results.fail(command.message_id(), err.clone());
            return Err(err);
        }
        Ok(future)
    }

    /// The result manager commands of this bus report to.
    #[must_use]
    pub fn results(&self) -> &Arc<CommandResultManager> {
        &self.results
    }
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBus")
            .field("pending_results", &self.results.pending_count())
            .finish_non_exhaustive()
    }
}
