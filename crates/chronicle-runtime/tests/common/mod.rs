//! Shared test helpers for runtime integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::command::{CommandEnvelope, Message};
use chronicle_core::error::DomainError;
use chronicle_core::handling::Handler;
use chronicle_core::transport::MessageSender;
use chronicle_runtime::config::RuntimeConfig;
use chronicle_runtime::context::RuntimeContext;
use chronicle_runtime::handling::InterceptorChain;
use chronicle_runtime::repository::Repository;
use chronicle_test_support::{RegisterUser, UserAccount, UserEvent, fixed_clock};

/// Build a context with in-memory stores and the fixed test clock.
pub fn build_test_context(config: RuntimeConfig) -> RuntimeContext {
    RuntimeContext::builder(config)
        .clock(Arc::new(fixed_clock()))
        .build()
}

/// Registers a user through the repository, using the command id as the
/// correlation id.
pub struct RegisterUserHandler {
    repository: Repository<UserAccount>,
}

impl RegisterUserHandler {
    pub fn new(context: &RuntimeContext) -> Self {
        Self {
            repository: context.repository().unwrap(),
        }
    }
}

#[async_trait]
impl Handler<RegisterUser> for RegisterUserHandler {
    fn handler_type(&self) -> &'static str {
        "RegisterUserHandler"
    }

    async fn handle(&self, command: &RegisterUser) -> Result<(), DomainError> {
        let mut user = self.repository.create(command.user_id.clone());
        user.raise_event(
            UserEvent::Registered {
                email: command.email.clone(),
            },
            self.repository.clock(),
        )?;
        self.repository.save(&mut user, command.message_id()).await?;
        Ok(())
    }
}

/// A transport that delivers `RegisterUser` envelopes straight to the
/// context's handler invoker and reports completion to its result manager.
pub struct LoopbackSender {
    context: RuntimeContext,
    handler: RegisterUserHandler,
    chain: InterceptorChain<RegisterUser>,
}

impl LoopbackSender {
    pub fn new(context: &RuntimeContext, chain: InterceptorChain<RegisterUser>) -> Self {
        Self {
            context: context.clone(),
            handler: RegisterUserHandler::new(context),
            chain,
        }
    }
}

#[async_trait]
impl MessageSender for LoopbackSender {
    async fn send_async(&self, envelopes: Vec<CommandEnvelope>) -> Result<(), DomainError> {
        for envelope in envelopes {
            let command: RegisterUser = serde_json::from_value(envelope.body().clone())?;
            let outcome = self
                .context
                .invoker()
                .invoke(&command, &self.handler, &self.chain)
                .await;
            let result = outcome.error().cloned().map_or(Ok(()), Err);
            self.context
                .results()
                .notify_command_executed(command.message_id(), result);
        }
        Ok(())
    }
}
