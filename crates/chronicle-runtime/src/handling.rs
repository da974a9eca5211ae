//! Idempotent handler dispatch.
//!
//! [`HandlerInvoker::invoke`] wraps one handler call in the
//! [`InterceptorChain`] and gates it on the handler-record ledger, so a
//! redelivered message runs each handler at most once.

use std::fmt;
use std::sync::Arc;

use chronicle_core::command::Message;
use chronicle_core::error::DomainError;
use chronicle_core::handling::{Handler, HandlerOutcome, Interceptor};
use chronicle_core::store::{HandlerClaim, HandlerRecord, HandlerRecordStore};
use tracing::{debug, instrument, warn};

/// Ordered interceptors for messages of type `M`. Both hooks run in
/// registration order.
pub struct InterceptorChain<M: Message> {
    interceptors: Vec<Arc<dyn Interceptor<M>>>,
}

impl<M: Message> InterceptorChain<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Appends `interceptor` to the chain.
    #[must_use]
    pub fn with(mut self, interceptor: Arc<dyn Interceptor<M>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    fn executing(&self, message: &M) {
        for interceptor in &self.interceptors {
            interceptor.on_handler_executing(message);
        }
    }

    fn executed(&self, message: &M, error: Option<&DomainError>) {
        for interceptor in &self.interceptors {
            interceptor.on_handler_executed(message, error);
        }
    }
}

impl<M: Message> Default for InterceptorChain<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Clone for InterceptorChain<M> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}

impl<M: Message> fmt::Debug for InterceptorChain<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Runs handlers at most once per (message id, handler type).
///
/// The handler-record ledger is the only gate: an execution starts only
/// after [`HandlerRecordStore::try_claim`] hands this invoker the record, so
/// invokers in different workers sharing one store never run the same
/// pair twice. No lock is held while the handler runs.
pub struct HandlerInvoker {
    records: Arc<dyn HandlerRecordStore>,
}

impl HandlerInvoker {
    /// Creates an invoker gated on `records`.
    #[must_use]
    pub fn new(records: Arc<dyn HandlerRecordStore>) -> Self {
        Self { records }
    }

    /// Dispatches `message` to `handler`.
    ///
    /// Pre-hooks run first. If the ledger already holds a completed record
    /// for this message and handler, the handler is skipped and post-hooks
    /// see no error. If another execution of the pair is still running, the
    /// delivery fails with `DomainError::HandlerInProgress` so the transport
    /// can redeliver it later. Otherwise the handler runs and its record is
    /// completed on success or released on failure.
    #[instrument(
        skip_all,
        fields(
            message_id = message.message_id(),
            message_type = message.message_type(),
            handler_type = handler.handler_type()
        )
    )]
    pub async fn invoke<M: Message>(
        &self,
        message: &M,
        handler: &dyn Handler<M>,
        chain: &InterceptorChain<M>,
    ) -> HandlerOutcome {
        chain.executing(message);

        let record = HandlerRecord::new(
            message.message_id(),
            message.message_type(),
            handler.handler_type(),
        );
        let outcome = self.run_once(message, handler, &record).await;

        chain.executed(message, outcome.error());
        outcome
    }

    async fn run_once<M: Message>(
        &self,
        message: &M,
        handler: &dyn Handler<M>,
        record: &HandlerRecord,
    ) -> HandlerOutcome {
        match self.records.try_claim(record).await {
            Ok(HandlerClaim::Acquired) => {}
            Ok(HandlerClaim::Completed) => {
                debug!("message already handled, skipping");
                return HandlerOutcome::SkippedAlreadyHandled;
            }
            Ok(HandlerClaim::InProgress) => {
                debug!("message is being handled elsewhere");
                return HandlerOutcome::Failed(DomainError::HandlerInProgress {
                    message_id: record.message_id.clone(),
                    handler_type: record.handler_type.clone(),
                });
            }
            Err(err) => {
                warn!(error = %err, "handler record claim failed");
                return HandlerOutcome::Failed(err);
            }
        }

        if let Err(err) = handler.handle(message).await {
            warn!(error = %err, "handler failed");
            if let Err(release_err) = self.records.release(record).await {
                warn!(error = %release_err, "handler claim could not be released");
            }
            return HandlerOutcome::Failed(err);
        }

        match self.records.complete(record).await {
            Ok(()) => {
                debug!("handler executed");
                HandlerOutcome::Executed
            }
            Err(err) => {
                warn!(error = %err, "handler ran but its record could not be stored");
                HandlerOutcome::Failed(err)
            }
        }
    }
}

impl fmt::Debug for HandlerInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInvoker").finish_non_exhaustive()
    }
}
