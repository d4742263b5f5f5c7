//! # Response Cache
//!
//! Memoizes resolved responses under an opaque key.
//!
//! Implementations are shared by overlapping requests, so they synchronize
//! internally. Both provided caches split their entries over
//! [`CACHE_SHARDS`] independently locked shards; no operation other than
//! `remove_all` touches more than one shard.

use crate::HyperstateError;
use crate::primitives::CACHE_SHARDS;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, RandomState};
use std::time::{Duration, Instant};

/// Cache contract.
pub trait ResponseCache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn put(&self, key: K, value: V);

    /// Store with a maximum age.
    ///
    /// Implementations without expiry return `HyperstateError::Unsupported`
    /// rather than ignoring the age.
    fn put_with_max_age(&self, key: K, value: V, max_age_seconds: u64) -> Result<(), HyperstateError> {
        let _ = (key, value, max_age_seconds);
        Err(HyperstateError::Unsupported("put with max age"))
    }

    fn put_all(&self, entries: Vec<(K, V)>) {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    fn remove(&self, key: &K);

    fn remove_all(&self);

    fn is_empty(&self) -> bool;
}

/// Fixed array of locked maps selected by key hash.
#[derive(Debug)]
struct Shards<K, T> {
    shards: Vec<RwLock<HashMap<K, T>>>,
    hasher: RandomState,
}

impl<K: Hash + Eq, T> Shards<K, T> {
    fn new() -> Self {
        Self {
            shards: (0..CACHE_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, T>> {
        let hash = self.hasher.hash_one(key);
        // Shard count is a small constant; the modulo fits in usize.
        let index = usize::try_from(hash % CACHE_SHARDS as u64).unwrap_or_default();
        &self.shards[index]
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }
}

// =============================================================================
// SHARDED CACHE
// =============================================================================

/// Concurrent cache without expiry.
#[derive(Debug)]
pub struct ShardedCache<K, V> {
    shards: Shards<K, V>,
}

impl<K: Hash + Eq, V> Default for ShardedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> ShardedCache<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: Shards::new(),
        }
    }
}

impl<K, V> ResponseCache<K, V> for ShardedCache<K, V>
where
    K: Hash + Eq + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.shards.shard(key).read().get(key).cloned()
    }

    fn put(&self, key: K, value: V) {
        self.shards.shard(&key).write().insert(key, value);
    }

    fn remove(&self, key: &K) {
        self.shards.shard(key).write().remove(key);
    }

    fn remove_all(&self) {
        self.shards.clear();
    }

    fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

// =============================================================================
// TIMED CACHE
// =============================================================================

#[derive(Debug, Clone)]
struct TimedEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> TimedEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Concurrent cache honouring per-entry maximum age.
///
/// Expired entries are dropped when read. A max age of zero expires
/// immediately.
#[derive(Debug)]
pub struct TimedCache<K, V> {
    shards: Shards<K, TimedEntry<V>>,
}

impl<K: Hash + Eq, V> Default for TimedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> TimedCache<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: Shards::new(),
        }
    }
}

impl<K, V> ResponseCache<K, V> for TimedCache<K, V>
where
    K: Hash + Eq + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        let shard = self.shards.shard(key);
        let now = Instant::now();
        {
            let entries = shard.read();
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = shard.write();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        None
    }

    fn put(&self, key: K, value: V) {
        let entry = TimedEntry {
            value,
            expires_at: None,
        };
        self.shards.shard(&key).write().insert(key, entry);
    }

    fn put_with_max_age(&self, key: K, value: V, max_age_seconds: u64) -> Result<(), HyperstateError> {
        let entry = TimedEntry {
            value,
            expires_at: Instant::now().checked_add(Duration::from_secs(max_age_seconds)),
        };
        self.shards.shard(&key).write().insert(key, entry);
        Ok(())
    }

    fn remove(&self, key: &K) {
        self.shards.shard(key).write().remove(key);
    }

    fn remove_all(&self) {
        self.shards.clear();
    }

    fn is_empty(&self) -> bool {
        let now = Instant::now();
        self.shards
            .shards
            .iter()
            .all(|s| s.read().values().all(|e| !e.is_live(now)))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_get_remove() {
        let cache: ShardedCache<String, u32> = ShardedCache::new();
        assert!(cache.is_empty());
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        cache.remove(&"a".to_string());
        assert!(cache.is_empty());
    }

    #[test]
    fn sharded_cache_rejects_max_age() {
        let cache: ShardedCache<String, u32> = ShardedCache::new();
        assert!(matches!(
            cache.put_with_max_age("a".to_string(), 1, 60),
            Err(HyperstateError::Unsupported(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn put_all_and_remove_all() {
        let cache: ShardedCache<u32, u32> = ShardedCache::new();
        cache.put_all((0..100).map(|i| (i, i * 2)).collect());
        assert_eq!(cache.get(&42), Some(84));
        cache.remove_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn timed_cache_honours_age() {
        let cache: TimedCache<String, u32> = TimedCache::new();
        cache
            .put_with_max_age("live".to_string(), 1, 3600)
            .expect("supported");
        cache
            .put_with_max_age("dead".to_string(), 2, 0)
            .expect("supported");
        assert_eq!(cache.get(&"live".to_string()), Some(1));
        assert_eq!(cache.get(&"dead".to_string()), None);
        cache.remove(&"live".to_string());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_access() {
        let cache: Arc<ShardedCache<u32, u32>> = Arc::new(ShardedCache::new());
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        cache.put(t * 1000 + i, i);
                        assert_eq!(cache.get(&(t * 1000 + i)), Some(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(cache.get(&7199), Some(199));
    }
}
