use mini_moka::sync::Cache;
use uuid::Uuid;

/// A thread-safe, bounded cache of request fingerprints used for
/// deduplication. Entries only leave by eviction.
///
/// `contains` followed by `insert` is not atomic; two concurrent submissions
/// of the same fingerprint may both miss. The race is benign: at worst one
/// duplicate reaches the queue.
#[derive(Debug, Clone)]
pub struct DedupCache {
    cache: Cache<Uuid, ()>,
}

impl DedupCache {
    /// Create a new dedup cache holding at most `capacity` fingerprints.
    pub fn new(capacity: u64) -> Self {
        Self { cache: Cache::builder().max_capacity(capacity).build() }
    }

    /// Insert a fingerprint into the cache.
    pub fn insert(&self, fingerprint: Uuid) {
        self.cache.insert(fingerprint, ());
    }

    /// Check if a fingerprint is in the cache.
    pub fn contains(&self, fingerprint: &Uuid) -> bool {
        self.cache.contains_key(fingerprint)
    }

    /// Number of fingerprints currently cached.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
