//! Byte-budgeted LRU cache.
//!
//! ## Memory-Based Eviction
//!
//! Entries are weighed in bytes through [`Weighted`]. Inserting an entry
//! evicts least recently used entries until the new one fits in the budget,
//! so the total weight never exceeds the budget. An entry heavier than the
//! whole budget is rejected with [`TileCacheError::CapacityExceeded`]; the
//! caller still serves it, it just isn't retained.
//!
//! ## Metrics
//!
//! All counters are atomics so metrics endpoints read them without taking
//! the cache lock:
//! - `hits`/`misses`: lookups
//! - `insertions`: successful inserts
//! - `evictions`: entries removed to make room
//! - `rejected`: entries larger than the budget
//! - `size_bytes`/`entries`: current contents

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::TileCacheError;
use crate::size::CacheSize;

/// Size of a cached value in bytes.
pub trait Weighted {
    fn weight(&self) -> u64;
}

impl Weighted for Bytes {
    fn weight(&self) -> u64 {
        self.len() as u64
    }
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> u64 {
        self.len() as u64
    }
}

impl<T: Weighted> Weighted for Arc<T> {
    fn weight(&self) -> u64 {
        self.as_ref().weight()
    }
}

impl Weighted for Vec<f32> {
    fn weight(&self) -> u64 {
        (self.len() * std::mem::size_of::<f32>()) as u64
    }
}

/// Cache counters, readable without locking.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub insertions: AtomicU64,
    pub evictions: AtomicU64,
    pub rejected: AtomicU64,
    pub size_bytes: AtomicU64,
    pub entries: AtomicU64,
}

impl CacheStats {
    /// Cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub name: String,
    pub enabled: bool,
    pub budget_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub rejected: u64,
    pub size_bytes: u64,
    pub entries: u64,
    pub hit_rate: f64,
}

/// Byte-budgeted LRU cache shared across request tasks.
///
/// A single mutex guards the recency list, so all reads and writes of a key
/// are serialized. Lookups also take the lock since they update recency.
pub struct TileCache<K, V> {
    name: String,
    budget: CacheSize,
    lru: Mutex<LruCache<K, V>>,
    stats: CacheStats,
}

impl<K, V> TileCache<K, V>
where
    K: Hash + Eq,
    V: Weighted + Clone,
{
    /// Create a cache with the given budget. A disabled budget stores nothing.
    pub fn new(name: impl Into<String>, budget: CacheSize) -> Self {
        Self {
            name: name.into(),
            budget,
            // Eviction is by weight, so the entry count itself is unbounded.
            lru: Mutex::new(LruCache::unbounded()),
            stats: CacheStats::default(),
        }
    }

    pub fn disabled(name: impl Into<String>) -> Self {
        Self::new(name, CacheSize::disabled())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        !self.budget.is_disabled()
    }

    pub fn budget(&self) -> CacheSize {
        self.budget
    }

    /// Look up a value, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut lru = self.lru.lock();
        match lru.get(key) {
            Some(value) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check for a key without touching recency or counters.
    pub fn contains(&self, key: &K) -> bool {
        self.lru.lock().contains(key)
    }

    /// Insert a value, evicting least recently used entries until it fits.
    ///
    /// Replacing an existing key releases the old value's weight first.
    /// With caching disabled this is a no-op.
    pub fn insert(&self, key: K, value: V) -> Result<(), TileCacheError> {
        let Some(budget) = self.budget.as_bytes() else {
            return Ok(());
        };
        let size = value.weight();

        let mut lru = self.lru.lock();

        if let Some(old) = lru.pop(&key) {
            self.release(old.weight(), 1);
        }

        if size > budget {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(TileCacheError::CapacityExceeded { size, budget });
        }

        let mut evicted = 0u64;
        let mut bytes_freed = 0u64;
        while self.stats.size_bytes.load(Ordering::Relaxed) + size > budget {
            match lru.pop_lru() {
                Some((_, old)) => {
                    let weight = old.weight();
                    self.release(weight, 1);
                    evicted += 1;
                    bytes_freed += weight;
                }
                None => break,
            }
        }

        lru.put(key, value);
        self.stats.size_bytes.fetch_add(size, Ordering::Relaxed);
        self.stats.entries.fetch_add(1, Ordering::Relaxed);
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);

        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(
                cache = %self.name,
                entries_evicted = evicted,
                bytes_freed = bytes_freed,
                size_bytes = self.stats.size_bytes.load(Ordering::Relaxed),
                budget_bytes = budget,
                "Cache eviction"
            );
        }

        Ok(())
    }

    /// Remove a single entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut lru = self.lru.lock();
        let old = lru.pop(key)?;
        self.release(old.weight(), 1);
        Some(old)
    }

    /// Remove every entry whose key matches `predicate`. Returns the number removed.
    pub fn remove_where(&self, predicate: impl Fn(&K) -> bool) -> usize
    where
        K: Clone,
    {
        let mut lru = self.lru.lock();
        let doomed: Vec<K> = lru
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(old) = lru.pop(key) {
                self.release(old.weight(), 1);
            }
        }
        doomed.len()
    }

    /// Drop every entry. Counters other than size and entries are kept.
    pub fn clear(&self) {
        let mut lru = self.lru.lock();
        lru.clear();
        self.stats.size_bytes.store(0, Ordering::Relaxed);
        self.stats.entries.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.stats.entries.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.stats.size_bytes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            name: self.name.clone(),
            enabled: self.is_enabled(),
            budget_bytes: self.budget.as_bytes().unwrap_or(0),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            insertions: self.stats.insertions.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            size_bytes: self.stats.size_bytes.load(Ordering::Relaxed),
            entries: self.stats.entries.load(Ordering::Relaxed),
            hit_rate: self.stats.hit_rate(),
        }
    }

    fn release(&self, bytes: u64, entries: u64) {
        self.stats.size_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.stats.entries.fetch_sub(entries, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(budget: u64) -> TileCache<String, Bytes> {
        TileCache::new("test", CacheSize::bytes(budget))
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = cache(1000);
        assert!(cache.is_empty());
        assert!(cache.get(&"tile1".to_string()).is_none());

        let data = Bytes::from("test data");
        cache.insert("tile1".to_string(), data.clone()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"tile1".to_string()), Some(data));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.insertions, 1);
        assert_eq!(stats.hit_rate, 50.0);
    }

    #[test]
    fn test_cache_size_tracking() {
        let cache = cache(1000);
        cache.insert("a".to_string(), Bytes::from("hello")).unwrap();
        assert_eq!(cache.size_bytes(), 5);
        cache.insert("b".to_string(), Bytes::from("world!")).unwrap();
        assert_eq!(cache.size_bytes(), 11);

        // Replacing releases the old weight
        cache
            .insert("a".to_string(), Bytes::from("hello world"))
            .unwrap();
        assert_eq!(cache.size_bytes(), 17);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = cache(30);
        cache.insert("a".to_string(), Bytes::from(vec![0u8; 10])).unwrap();
        cache.insert("b".to_string(), Bytes::from(vec![0u8; 10])).unwrap();
        cache.insert("c".to_string(), Bytes::from(vec![0u8; 10])).unwrap();

        // Touch "a" so "b" is least recently used
        assert!(cache.get(&"a".to_string()).is_some());
        cache.insert("d".to_string(), Bytes::from(vec![0u8; 10])).unwrap();

        assert!(cache.contains(&"a".to_string()));
        assert!(!cache.contains(&"b".to_string()));
        assert!(cache.contains(&"c".to_string()));
        assert!(cache.contains(&"d".to_string()));
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.size_bytes() <= 30);
    }

    #[test]
    fn test_eviction_frees_enough_for_large_entry() {
        let cache = cache(30);
        for key in ["a", "b", "c"] {
            cache.insert(key.to_string(), Bytes::from(vec![0u8; 10])).unwrap();
        }
        cache.insert("big".to_string(), Bytes::from(vec![0u8; 25])).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 25);
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_oversize_entry_rejected() {
        let cache = cache(10);
        cache.insert("small".to_string(), Bytes::from("abc")).unwrap();

        let err = cache
            .insert("huge".to_string(), Bytes::from(vec![0u8; 11]))
            .unwrap_err();
        assert!(matches!(
            err,
            TileCacheError::CapacityExceeded { size: 11, budget: 10 }
        ));
        assert!(!cache.contains(&"huge".to_string()));
        assert!(cache.contains(&"small".to_string()));
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache: TileCache<String, Bytes> = TileCache::disabled("off");
        cache.insert("a".to_string(), Bytes::from("data")).unwrap();
        assert!(cache.get(&"a".to_string()).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size_bytes(), 0);
        assert!(!cache.stats().enabled);
    }

    #[test]
    fn test_remove_where() {
        let cache = cache(1000);
        for key in ["ds1/a", "ds1/b", "ds2/a"] {
            cache.insert(key.to_string(), Bytes::from("x")).unwrap();
        }
        let removed = cache.remove_where(|k| k.starts_with("ds1/"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 1);
    }

    #[test]
    fn test_chunk_weight() {
        let chunk = Arc::new(vec![0f32; 256]);
        assert_eq!(chunk.weight(), 1024);
    }
}
