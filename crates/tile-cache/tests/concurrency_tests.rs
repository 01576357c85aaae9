//! Concurrent access to a shared cache.

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use tile_cache::{CacheSize, TileCache};

#[test]
fn test_budget_holds_under_concurrent_inserts() {
    let cache: Arc<TileCache<(u32, u32), Bytes>> =
        Arc::new(TileCache::new("tiles", CacheSize::parse("10K").unwrap()));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..200 {
                    let _ = cache.insert((worker, i), Bytes::from(vec![worker as u8; 300]));
                    let _ = cache.get(&(worker, i / 2));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert!(stats.size_bytes <= 10_000);
    assert_eq!(stats.size_bytes, stats.entries * 300);
    assert_eq!(stats.insertions, 1600);
    assert_eq!(stats.insertions - stats.evictions, stats.entries);
}

#[test]
fn test_second_lookup_hits() {
    let cache: TileCache<&'static str, Bytes> =
        TileCache::new("tiles", CacheSize::parse("1M").unwrap());

    for key in ["a", "b", "c"] {
        assert!(cache.get(&key).is_none());
        cache.insert(key, Bytes::from_static(b"png")).unwrap();
    }
    for key in ["a", "b", "c"] {
        assert!(cache.get(&key).is_some());
    }

    let stats = cache.stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.hit_rate, 50.0);
}
