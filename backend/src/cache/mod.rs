//! Read-through cache with explicit invalidation.
//!
//! Formula rows, characteristic rules and loaded configs are read-mostly:
//! they are loaded on first access and kept until [`Cache::invalidate`] is
//! called (typically after an administrative edit). There is no TTL.
//!
//! Each service owns its own cache instance, so tests get a fresh one per case.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Keyed read-through cache. Values are shared as `Arc<V>`.
pub struct Cache<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached value for `key`, if loaded.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    /// Return the cached value or load, store and return it.
    ///
    /// Load errors are returned as-is and nothing is cached.
    pub fn get_or_try_load<E>(&self, key: &K, load: impl FnOnce() -> Result<V, E>) -> Result<Arc<V>, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let value = Arc::new(load()?);
        if let Ok(mut entries) = self.entries.write() {
            // A concurrent loader may have won; keep the first value.
            let stored = entries.entry(key.clone()).or_insert_with(|| value.clone());
            return Ok(stored.clone());
        }
        Ok(value)
    }

    /// Drop every cached entry.
    pub fn invalidate(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
