//! DEK cache keyed by wrapped DEK bytes
//!
//! Avoids a KMS round-trip on every read. Entries are content-addressed by
//! the exact wrapped bytes, so an entry can never be stale, only unused; no
//! TTL is needed and least-recently-used entries are evicted at capacity.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Plaintext DEK shared between the cache and in-flight operations.
pub type PlainDek = Arc<Zeroizing<Vec<u8>>>;

/// Bounded LRU map from wrapped DEK to plaintext DEK.
///
/// A single mutex guards the LRU list; entries are tiny and the critical
/// section is a hash lookup plus a list splice.
pub struct DekCache {
    inner: Mutex<LruCache<Vec<u8>, PlainDek>>,
    capacity: NonZeroUsize,
}

impl DekCache {
    /// Create a cache holding at most `capacity` DEKs. Zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner: Mutex::new(LruCache::new(capacity)), capacity }
    }

    /// Look up the plaintext DEK for `wrapped`, marking it recently used.
    pub fn get(&self, wrapped: &[u8]) -> Option<PlainDek> {
        self.inner.lock().get(wrapped).cloned()
    }

    /// Remember the plaintext for `wrapped`, evicting the oldest entry if full.
    pub fn put(&self, wrapped: &[u8], plain: PlainDek) {
        self.inner.lock().put(wrapped.to_vec(), plain);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl std::fmt::Debug for DekCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DekCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dek(byte: u8) -> PlainDek {
        Arc::new(Zeroizing::new(vec![byte; 32]))
    }

    #[test]
    fn test_put_and_get() {
        let cache = DekCache::new(4);
        cache.put(b"wrapped-a", dek(1));
        assert_eq!(cache.get(b"wrapped-a").unwrap().as_slice(), &[1u8; 32]);
        assert!(cache.get(b"wrapped-b").is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = DekCache::new(2);
        cache.put(b"a", dek(1));
        cache.put(b"b", dek(2));
        // touch "a" so "b" becomes least recently used
        assert!(cache.get(b"a").is_some());
        cache.put(b"c", dek(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(b"a").is_some());
        assert!(cache.get(b"b").is_none());
        assert!(cache.get(b"c").is_some());
    }

    #[test]
    fn test_distinct_wraps_of_same_dek_are_distinct_entries() {
        let cache = DekCache::new(8);
        let shared = dek(9);
        cache.put(b"wrap-nonce-1", shared.clone());
        cache.put(b"wrap-nonce-2", shared);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = DekCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(b"a", dek(1));
        cache.put(b"b", dek(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(DekCache::new(64));
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100u8 {
                        let key = [t, i];
                        cache.put(&key, dek(i));
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
