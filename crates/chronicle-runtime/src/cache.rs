//! In-process cache of serialized values.
//!
//! Values are stored as JSON and deserialized on every read, so callers
//! always receive a fresh instance they may mutate freely. Entries are
//! keyed by Rust type and string key.

use std::any::type_name;
use std::collections::HashMap;

use chronicle_core::error::DomainError;
use chronicle_event_store::striped::Striped;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

type CacheKey = (&'static str, String);

/// Config-gated memory cache. When disabled, `get` always misses and
/// writes are ignored.
#[derive(Debug)]
pub struct MemoryCache {
    enabled: bool,
    entries: Striped<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryCache {
    /// Creates a cache with `stripes` lock stripes.
    #[must_use]
    pub fn new(enabled: bool, stripes: usize) -> Self {
        Self {
            enabled,
            entries: Striped::new(stripes),
        }
    }

    /// A cache that never stores anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false, 1)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns a deserialized copy of the `T` stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the stored bytes no longer
    /// deserialize into `T`, or `DomainError::Infrastructure` if a lock is
    /// poisoned.
    pub fn get<T: DeserializeOwned + 'static>(&self, key: &str) -> Result<Option<T>, DomainError> {
        if !self.enabled {
            return Ok(None);
        }
        let cache_key = (type_name::<T>(), key.to_owned());
        let entries = self.entries.lock(&cache_key)?;
        entries
            .get(&cache_key)
            .map(|bytes| serde_json::from_slice(bytes).map_err(DomainError::from))
            .transpose()
    }

    /// Stores a serialized copy of `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if `value` cannot be
    /// serialized, or `DomainError::Infrastructure` if a lock is poisoned.
    pub fn set<T: Serialize + 'static>(&self, value: &T, key: &str) -> Result<(), DomainError> {
        if !self.enabled {
            return Ok(());
        }
        let bytes = serde_json::to_vec(value)?;
        let cache_key = (type_name::<T>(), key.to_owned());
        self.entries.lock(&cache_key)?.insert(cache_key, bytes);
        Ok(())
    }

    /// Drops the `T` stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if a lock is poisoned.
    pub fn remove<T: 'static>(&self, key: &str) -> Result<(), DomainError> {
        if !self.enabled {
            return Ok(());
        }
        let cache_key = (type_name::<T>(), key.to_owned());
        self.entries.lock(&cache_key)?.remove(&cache_key);
        Ok(())
    }

    /// Drops every entry.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if a lock is poisoned.
    pub fn clear(&self) -> Result<(), DomainError> {
        let mut dropped = 0;
        self.entries.for_each_stripe(|entries| {
            dropped += entries.len();
            entries.clear();
        })?;
        debug!(dropped, "cleared memory cache");
        Ok(())
    }
}
