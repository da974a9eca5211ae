//! Aggregate identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Partition key for all per-aggregate state: events, snapshots and cache
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    /// Aggregate type name (e.g. `"user"`).
    pub aggregate_type: String,
    /// Aggregate instance identifier within its type.
    pub aggregate_id: String,
}

impl SourceKey {
    /// Creates a new source key.
    #[must_use]
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_key_displays_type_and_id() {
        let key = SourceKey::new("user", "U1");

        assert_eq!(key.to_string(), "user/U1");
    }

    #[test]
    fn test_source_keys_with_same_id_but_different_type_are_distinct() {
        assert_ne!(SourceKey::new("user", "1"), SourceKey::new("order", "1"));
    }
}
