//! Chronicle Runtime — configuration error types.

use thiserror::Error;

/// Errors raised while loading a `RuntimeConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is present but cannot be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv {
        /// The offending variable.
        var: &'static str,
        /// Why parsing failed.
        reason: String,
    },

    /// The YAML document is malformed or has fields of the wrong type.
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The values parse but are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
