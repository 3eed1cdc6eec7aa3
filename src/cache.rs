//! Caching layer for consensus message handling
//!
//! Provides LRU caching for:
//! - Repeat hashes of messages already handled, so a message delivered
//!   twice is dropped before validation
use crate::primitives::Hash;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Bounded set of recently seen message repeat hashes.
pub struct RepeatCache {
    seen: LruCache<Hash, ()>,
}

impl RepeatCache {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(capacity: usize) -> Self {
        // a zero capacity is mapped to one
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(capacity_nz),
        }
    }

    /// Records `hash`. Returns `false` when it was already present.
    pub fn insert(&mut self, hash: Hash) -> bool {
        self.seen.put(hash, ()).is_none()
    }

    /// Non-promoting lookup.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.seen.contains(hash)
    }

    /// Forgets `hash`, so a later delivery is handled again.
    pub fn forget(&mut self, hash: &Hash) {
        self.seen.pop(hash);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.seen.cap().get()
    }
}

impl Default for RepeatCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
