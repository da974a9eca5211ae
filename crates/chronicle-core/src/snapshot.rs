//! Snapshot policies.

use std::collections::HashMap;

/// Decides when a committed aggregate should be snapshotted.
pub trait SnapshotPolicy: Send + Sync {
    /// Returns whether an aggregate of `aggregate_type` that just reached
    /// `version` should be snapshotted.
    fn should_create_snapshot(&self, aggregate_type: &str, version: u64) -> bool;
}

/// Never snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshotPolicy;

impl SnapshotPolicy for NoSnapshotPolicy {
    fn should_create_snapshot(&self, _aggregate_type: &str, _version: u64) -> bool {
        false
    }
}

/// Snapshots every `threshold` versions, with optional per-type thresholds.
///
/// A threshold of zero disables snapshotting for the types it applies to.
#[derive(Debug, Clone)]
pub struct VersionThresholdPolicy {
    threshold: u64,
    overrides: HashMap<String, u64>,
}

impl VersionThresholdPolicy {
    /// Creates a policy snapshotting every `threshold` versions.
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            overrides: HashMap::new(),
        }
    }

    /// Uses `threshold` instead of the default for `aggregate_type`.
    #[must_use]
    pub fn with_override(mut self, aggregate_type: impl Into<String>, threshold: u64) -> Self {
        self.overrides.insert(aggregate_type.into(), threshold);
        self
    }

    fn threshold_for(&self, aggregate_type: &str) -> u64 {
        self.overrides
            .get(aggregate_type)
            .copied()
            .unwrap_or(self.threshold)
    }
}

impl SnapshotPolicy for VersionThresholdPolicy {
    fn should_create_snapshot(&self, aggregate_type: &str, version: u64) -> bool {
        let threshold = self.threshold_for(aggregate_type);
        threshold > 0 && version > 0 && version % threshold == 0
    }
}
