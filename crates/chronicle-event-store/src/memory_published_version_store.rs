//! In-memory implementation of the `PublishedVersionStore` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::identity::SourceKey;
use chronicle_core::store::PublishedVersionStore;
use tracing::{debug, warn};

use crate::striped::{DEFAULT_STRIPES, Striped};

/// Process-local published-version table.
#[derive(Debug)]
pub struct InMemoryPublishedVersionStore {
    versions: Striped<HashMap<SourceKey, u64>>,
}

impl InMemoryPublishedVersionStore {
    /// Creates a store with the default number of lock stripes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Creates a store with `stripes` lock stripes.
    #[must_use]
    pub fn with_stripes(stripes: usize) -> Self {
        Self {
            versions: Striped::new(stripes),
        }
    }
}

impl Default for InMemoryPublishedVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PublishedVersionStore for InMemoryPublishedVersionStore {
    async fn add_or_update_published_version(
        &self,
        key: &SourceKey,
        start_version: u64,
        end_version: u64,
    ) -> Result<bool, DomainError> {
        if start_version == 0 || end_version < start_version {
            return Err(DomainError::Validation(format!(
                "invalid published range {start_version}..={end_version} for {key}"
            )));
        }

        let mut versions = self.versions.lock(key)?;
        let current = versions.get(key).copied().unwrap_or(0);
        if start_version != current + 1 {
            warn!(aggregate_id = %key, current, start_version, end_version, "published range does not continue stream");
            return Ok(false);
        }
        versions.insert(key.clone(), end_version);
        debug!(aggregate_id = %key, version = end_version, "advanced published version");
        Ok(true)
    }

    async fn get_published_version(&self, key: &SourceKey) -> Result<u64, DomainError> {
        Ok(self.versions.lock(key)?.get(key).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str) -> SourceKey {
        SourceKey::new("order", id)
    }

    #[tokio::test]
    async fn test_unpublished_aggregate_reports_zero() {
        let store = InMemoryPublishedVersionStore::new();

        let version = store.get_published_version(&order("O1")).await.unwrap();

        assert_eq!(version, 0);
    }

    #[tokio::test]
    async fn test_contiguous_ranges_advance_published_version() {
        // Arrange
        let store = InMemoryPublishedVersionStore::new();
        let key = order("O1");

        // Act
        let first = store.add_or_update_published_version(&key, 1, 2).await.unwrap();
        let second = store.add_or_update_published_version(&key, 3, 3).await.unwrap();

        // Assert
        assert!(first);
        assert!(second);
        assert_eq!(store.get_published_version(&key).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gap_or_replay_leaves_version_untouched() {
        // Arrange
        let store = InMemoryPublishedVersionStore::new();
        let key = order("O1");
        store.add_or_update_published_version(&key, 1, 2).await.unwrap();

        // Act
        let gap = store.add_or_update_published_version(&key, 5, 6).await.unwrap();
        let replay = store.add_or_update_published_version(&key, 1, 2).await.unwrap();

        // Assert
        assert!(!gap);
        assert!(!replay);
        assert_eq!(store.get_published_version(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected() {
        let store = InMemoryPublishedVersionStore::new();

        let result = store
            .add_or_update_published_version(&order("O1"), 4, 2)
            .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_versions_are_tracked_per_aggregate() {
        let store = InMemoryPublishedVersionStore::new();
        store
            .add_or_update_published_version(&order("O1"), 1, 4)
            .await
            .unwrap();

        let other = store.get_published_version(&order("O2")).await.unwrap();

        assert_eq!(other, 0);
    }
}
