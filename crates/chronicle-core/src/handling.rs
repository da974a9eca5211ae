//! Message handler and interceptor contracts.

use async_trait::async_trait;

use crate::command::Message;
use crate::error::DomainError;

/// Handles messages of type `M`.
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    /// The type name recorded in the idempotency ledger.
    fn handler_type(&self) -> &'static str;

    /// Produces the handler's side effects for `message`.
    async fn handle(&self, message: &M) -> Result<(), DomainError>;
}

/// Cross-cutting hooks run around handler execution.
///
/// `error` is `None` both for a clean run and for a skipped redelivery.
pub trait Interceptor<M: Message>: Send + Sync {
    /// Runs before the ledger claim and the handler.
    fn on_handler_executing(&self, _message: &M) {}

    /// Runs after the handler finished, failed or was skipped.
    fn on_handler_executed(&self, _message: &M, _error: Option<&DomainError>) {}
}

/// Result of dispatching one message to one handler.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The handler ran and its record was stored.
    Executed,
    /// The handler already completed for this message; it did not run.
    SkippedAlreadyHandled,
    /// The handler or the ledger failed, or another execution of the same
    /// message and handler is still running.
    Failed(DomainError),
}

impl HandlerOutcome {
    /// The failure, if any. A skipped redelivery is not a failure.
    #[must_use]
    pub fn error(&self) -> Option<&DomainError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Executed | Self::SkippedAlreadyHandled => None,
        }
    }

    /// Whether the message counts as handled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_outcome_is_success_without_error() {
        let outcome = HandlerOutcome::SkippedAlreadyHandled;

        assert!(outcome.is_success());
        assert!(outcome.error().is_none());
    }

    #[test]
    fn test_failed_outcome_exposes_error() {
        let outcome = HandlerOutcome::Failed(DomainError::Validation("bad".into()));

        assert!(!outcome.is_success());
        assert!(matches!(outcome.error(), Some(DomainError::Validation(_))));
    }
}
