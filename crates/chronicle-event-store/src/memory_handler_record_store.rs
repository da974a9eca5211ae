//! In-memory implementation of the `HandlerRecordStore` trait.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::store::{HandlerClaim, HandlerRecord, HandlerRecordStore};
use tracing::debug;

use crate::striped::{DEFAULT_STRIPES, Striped};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Claimed,
    Completed,
}

/// Process-local idempotency ledger.
#[derive(Debug)]
pub struct InMemoryHandlerRecordStore {
    records: Striped<HashMap<HandlerRecord, RecordState>>,
}

impl InMemoryHandlerRecordStore {
    /// Creates a store with the default number of lock stripes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Creates a store with `stripes` lock stripes.
    #[must_use]
    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            records: Striped::new(stripes),
        }
    }
}

impl Default for InMemoryHandlerRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HandlerRecordStore for InMemoryHandlerRecordStore {
    async fn add_handler_info(&self, record: &HandlerRecord) -> Result<bool, DomainError> {
        let mut records = self.records.lock(record)?;
        let previous = records.insert(record.clone(), RecordState::Completed);
        Ok(previous != Some(RecordState::Completed))
    }

    async fn is_handler_info_exist(&self, record: &HandlerRecord) -> Result<bool, DomainError> {
        Ok(self.records.lock(record)?.get(record) == Some(&RecordState::Completed))
    }

    async fn try_claim(&self, record: &HandlerRecord) -> Result<HandlerClaim, DomainError> {
        let mut records = self.records.lock(record)?;
        Ok(match records.entry(record.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(RecordState::Claimed);
                HandlerClaim::Acquired
            }
            Entry::Occupied(slot) => match slot.get() {
                RecordState::Claimed => HandlerClaim::InProgress,
                RecordState::Completed => HandlerClaim::Completed,
            },
        })
    }

    async fn complete(&self, record: &HandlerRecord) -> Result<(), DomainError> {
        self.records
            .lock(record)?
            .insert(record.clone(), RecordState::Completed);
        Ok(())
    }

    async fn release(&self, record: &HandlerRecord) -> Result<(), DomainError> {
        let mut records = self.records.lock(record)?;
        if records.get(record) == Some(&RecordState::Claimed) {
            records.remove(record);
            debug!(message_id = %record.message_id, handler_type = %record.handler_type, "released handler claim");
        }
        Ok(())
    }
}
