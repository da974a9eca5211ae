//! In-memory implementation of the `SnapshotStore` trait.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::identity::SourceKey;
use chronicle_core::store::{Snapshot, SnapshotStore};
use tracing::debug;

use crate::striped::{DEFAULT_STRIPES, Striped};

/// Process-local snapshot store keeping every snapshot by version.
#[derive(Debug)]
pub struct InMemorySnapshotStore {
    snapshots: Striped<HashMap<SourceKey, BTreeMap<u64, Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates a store with the default number of lock stripes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Creates a store with `stripes` lock stripes.
    #[must_use]
    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            snapshots: Striped::new(stripes),
        }
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn find(
        &self,
        key: &SourceKey,
        max_version: u64,
    ) -> Result<Option<Snapshot>, DomainError> {
        let snapshots = self.snapshots.lock(key)?;
        Ok(snapshots.get(key).and_then(|by_version| {
            by_version
                .range(..=max_version)
                .next_back()
                .map(|(_, snapshot)| snapshot.clone())
        }))
    }

    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let key = snapshot.key.clone();
        let version = snapshot.version;
        self.snapshots
            .lock(&key)?
            .entry(key.clone())
            .or_default()
            .insert(version, snapshot);
        debug!(aggregate_id = %key, version, "stored snapshot");
        Ok(())
    }

    async fn remove_all(&self, key: &SourceKey) -> Result<(), DomainError> {
        self.snapshots.lock(key)?.remove(key);
        Ok(())
    }
}
