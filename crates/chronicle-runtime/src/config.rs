//! Runtime configuration.
//!
//! Loaded either from `CHRONICLE_*` environment variables or from a YAML
//! document. Every field has a default, so an empty source is valid.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chronicle_core::snapshot::{NoSnapshotPolicy, SnapshotPolicy, VersionThresholdPolicy};
use chronicle_event_store::striped::DEFAULT_STRIPES;
use serde::Deserialize;

use crate::error::ConfigError;

const ENV_CACHING_ENABLED: &str = "CHRONICLE_CACHING_ENABLED";
const ENV_SNAPSHOT_THRESHOLD: &str = "CHRONICLE_SNAPSHOT_THRESHOLD";
const ENV_COMMAND_TIMEOUT_MS: &str = "CHRONICLE_COMMAND_TIMEOUT_MS";
const ENV_LOCK_STRIPES: &str = "CHRONICLE_LOCK_STRIPES";

/// Settings for a `RuntimeContext`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Enables the aggregate image cache.
    pub caching_enabled: bool,
    /// Default snapshot interval in versions; `None` disables snapshots.
    pub snapshot_threshold: Option<u64>,
    /// Per-aggregate-type snapshot intervals.
    pub snapshot_overrides: HashMap<String, u64>,
    /// How long command result waiters block by default.
    pub command_timeout_ms: u64,
    /// Number of lock stripes in stores, cache and dispatcher.
    pub lock_stripes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            caching_enabled: false,
            snapshot_threshold: None,
            snapshot_overrides: HashMap::new(),
            command_timeout_ms: 10_000,
            lock_stripes: DEFAULT_STRIPES,
        }
    }
}

impl RuntimeConfig {
    /// Reads configuration from the process environment. Unset variables
    /// keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or a value is
    /// out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or a value is
    /// out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(enabled) = parse_var::<bool>(&lookup, ENV_CACHING_ENABLED)? {
            config.caching_enabled = enabled;
        }
        if let Some(threshold) = parse_var::<u64>(&lookup, ENV_SNAPSHOT_THRESHOLD)? {
            config.snapshot_threshold = Some(threshold);
        }
        if let Some(timeout) = parse_var::<u64>(&lookup, ENV_COMMAND_TIMEOUT_MS)? {
            config.command_timeout_ms = timeout;
        }
        if let Some(stripes) = parse_var::<usize>(&lookup, ENV_LOCK_STRIPES)? {
            config.lock_stripes = stripes;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document such as:
    ///
    /// ```yaml
    /// caching_enabled: true
    /// snapshot_threshold: 50
    /// snapshot_overrides:
    ///   order: 10
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document is malformed or a value is out
    /// of range.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a zero timeout or zero stripes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "command_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.lock_stripes == 0 {
            return Err(ConfigError::Invalid(
                "lock_stripes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Default wait for command results.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Builds the snapshot policy these settings describe.
    ///
    /// Overrides alone enable snapshots for the listed types only.
    #[must_use]
    pub fn snapshot_policy(&self) -> Arc<dyn SnapshotPolicy> {
        if self.snapshot_threshold.is_none() && self.snapshot_overrides.is_empty() {
            return Arc::new(NoSnapshotPolicy);
        }
        let policy = self.snapshot_overrides.iter().fold(
            VersionThresholdPolicy::new(self.snapshot_threshold.unwrap_or(0)),
            |policy, (aggregate_type, threshold)| {
                policy.with_override(aggregate_type.clone(), *threshold)
            },
        );
        Arc::new(policy)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                var,
                reason: e.to_string(),
            })
        })
        .transpose()
}
