//! Decode cache for whole-file reads.
//!
//! Decoded stacks are cached by the literal location string passed to
//! [`Registry::open`](super::Registry::open). Entries are shared as
//! `Arc<ImageStack>` so a cached stack can never be mutated in place.
//!
//! The cache is unbounded unless a capacity is given, in which case the
//! least-recently-used entry is evicted first.

use std::num::NonZeroUsize;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use lru::LruCache;

use crate::stack::ImageStack;

/// LRU cache of decoded stacks keyed by location string.
pub struct DecodeCache {
    entries: RwLock<LruCache<String, Arc<ImageStack>>>,
}

impl DecodeCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(LruCache::unbounded()),
        }
    }

    /// Create a cache holding at most `capacity` stacks. Zero means unbounded.
    pub fn with_capacity(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => Self {
                entries: RwLock::new(LruCache::new(capacity)),
            },
            None => Self::new(),
        }
    }

    /// Get a cached stack, marking it as recently used.
    pub fn get(&self, key: &str) -> Option<Arc<ImageStack>> {
        self.write().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn put(&self, key: String, stack: Arc<ImageStack>) {
        self.write().put(key, stack);
    }

    /// Remove one entry. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.write().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> RwLockWriteGuard<'_, LruCache<String, Arc<ImageStack>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DecodeCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
