//! Test handlers and interceptors.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chronicle_core::command::Message;
use chronicle_core::error::DomainError;
use chronicle_core::handling::{Handler, Interceptor};

/// A handler that counts invocations and always succeeds.
#[derive(Debug, Default)]
pub struct CountingHandler {
    calls: AtomicUsize,
}

impl CountingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `handle` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<M: Message + 'static> Handler<M> for CountingHandler {
    fn handler_type(&self) -> &'static str {
        "CountingHandler"
    }

    async fn handle(&self, _message: &M) -> Result<(), DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A handler that always fails with a validation error.
#[derive(Debug)]
pub struct FailingHandler;

#[async_trait]
impl<M: Message + 'static> Handler<M> for FailingHandler {
    fn handler_type(&self) -> &'static str {
        "FailingHandler"
    }

    async fn handle(&self, _message: &M) -> Result<(), DomainError> {
        Err(DomainError::Validation("rejected".into()))
    }
}

/// An interceptor that records hook calls as strings such as
/// `"audit:before:m-1"` and `"audit:after:m-1:ok"`.
#[derive(Debug)]
pub struct RecordingInterceptor {
    name: &'static str,
    log: std::sync::Arc<Mutex<Vec<String>>>,
}

impl RecordingInterceptor {
    /// Creates an interceptor appending to the shared `log`.
    #[must_use]
    pub fn new(name: &'static str, log: std::sync::Arc<Mutex<Vec<String>>>) -> Self {
        Self { name, log }
    }
}

impl<M: Message> Interceptor<M> for RecordingInterceptor {
    fn on_handler_executing(&self, message: &M) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:before:{}", self.name, message.message_id()));
    }

    fn on_handler_executed(&self, message: &M, error: Option<&DomainError>) {
        let result = if error.is_some() { "err" } else { "ok" };
        self.log.lock().unwrap().push(format!(
            "{}:after:{}:{result}",
            self.name,
            message.message_id()
        ));
    }
}
