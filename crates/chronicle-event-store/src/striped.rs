//! Striped lock table.
//!
//! Keys are hashed onto a fixed number of independently locked stripes, so
//! operations on different keys rarely contend and operations on the same
//! key are always mutually exclusive.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use chronicle_core::error::DomainError;

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// A fixed set of `Mutex<T>` selected by key hash.
#[derive(Debug)]
pub struct Striped<T> {
    stripes: Box<[Mutex<T>]>,
}

impl<T: Default> Striped<T> {
    /// Creates `count` stripes (at least one).
    #[must_use]
    pub fn new(count: usize) -> Self {
        let stripes = (0..count.max(1)).map(|_| Mutex::new(T::default())).collect();
        Self { stripes }
    }
}

impl<T: Default> Default for Striped<T> {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl<T> Striped<T> {
    /// Number of stripes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always `false`; a table has at least one stripe.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Index of the stripe guarding `key`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Locks the stripe guarding `key`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the stripe is poisoned.
    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> Result<MutexGuard<'_, T>, DomainError> {
        self.stripes[self.index_of(key)]
            .lock()
            .map_err(|_| DomainError::Infrastructure("striped lock poisoned".into()))
    }

    /// Runs `f` on every stripe in turn, each under its own lock.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if a stripe is poisoned.
    pub fn for_each_stripe(&self, mut f: impl FnMut(&mut T)) -> Result<(), DomainError> {
        for stripe in &*self.stripes {
            let mut guard = stripe
                .lock()
                .map_err(|_| DomainError::Infrastructure("striped lock poisoned".into()))?;
            f(&mut guard);
        }
        Ok(())
    }
}
