//! Integration tests for the cache module
//!
//! These tests verify the complete cache functionality including:
//! - Basic cache operations
//! - TTL expiration
//! - LRU eviction
//! - Invalidation by key, pattern and category
//! - Persistence and sharing between instances
//! - Concurrent access

use serde::{Deserialize, Serialize};
use skill_cache::cache::{CacheConfig, CacheRegistry, Invalidation, Memoized, SkillCache};
use skill_cache::CacheError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn config(dir: &TempDir) -> CacheConfig {
    CacheConfig::builder().cache_dir(dir.path()).build()
}

/// A JSON string payload of exactly `size` bytes
fn payload(size: usize) -> String {
    "x".repeat(size - 2)
}

#[test]
fn test_basic_cache_operations() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("basic", config(&dir)).unwrap();

    cache.set("key1", "value1").unwrap();
    assert_eq!(cache.get::<String>("key1").unwrap(), Some("value1".to_string()));

    let stats = cache.stats().unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.entry_count, 1);
}

#[test]
fn test_value_shapes_round_trip() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Page {
        id: u64,
        title: String,
        labels: Vec<String>,
        parent: Option<u64>,
    }

    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("shapes", config(&dir)).unwrap();

    let page = Page {
        id: 7,
        title: "Home".to_string(),
        labels: vec!["a".to_string(), "b".to_string()],
        parent: None,
    };
    let mut map = BTreeMap::new();
    map.insert("nested".to_string(), vec![1.5, -2.0]);

    cache.set("page", &page).unwrap();
    cache.set("map", &map).unwrap();
    cache.set("flag", &false).unwrap();
    cache.set("unit", &()).unwrap();

    assert_eq!(cache.get::<Page>("page").unwrap(), Some(page));
    assert_eq!(cache.get::<BTreeMap<String, Vec<f64>>>("map").unwrap(), Some(map));
    assert_eq!(cache.get::<bool>("flag").unwrap(), Some(false));
    assert_eq!(cache.get::<()>("unit").unwrap(), Some(()));
}

#[test]
fn test_category_isolation() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("categories", config(&dir)).unwrap();

    cache.set_in("api", "key1", "value1").unwrap();
    assert_eq!(
        cache.get_in::<String>("api", "key1").unwrap(),
        Some("value1".to_string())
    );
    assert_eq!(cache.get_in::<String>("other", "key1").unwrap(), None);
    assert_eq!(cache.get::<String>("key1").unwrap(), None);
}

#[test]
fn test_overwrite_replaces_value() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("overwrite", config(&dir)).unwrap();

    cache.set("k", &1).unwrap();
    cache.set("k", &2).unwrap();

    assert_eq!(cache.get::<i32>("k").unwrap(), Some(2));
    assert_eq!(cache.stats().unwrap().entry_count, 1);
}

#[test]
fn test_ttl_expiration() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("ttl", config(&dir)).unwrap();

    cache
        .set_with_ttl("default", "expiring_key", "expiring_value", Duration::from_millis(100))
        .unwrap();

    // Should be available immediately
    assert!(cache.get::<String>("expiring_key").unwrap().is_some());

    thread::sleep(Duration::from_millis(150));

    // Should be expired now
    assert!(cache.get::<String>("expiring_key").unwrap().is_none());

    let stats = cache.stats().unwrap();
    assert_eq!(stats.entry_count, 0);
    assert_eq!(stats.expired_count, 1);

    assert_eq!(cache.purge_expired().unwrap(), 1);
    assert_eq!(cache.stats().unwrap().expired_count, 0);
}

#[test]
fn test_category_ttl_defaults() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::builder()
        .cache_dir(dir.path())
        .no_default_ttl()
        .build();
    let cache = SkillCache::open("ttl-defaults", config).unwrap();

    cache
        .set_ttl_defaults([("short", Duration::from_millis(100))])
        .unwrap();
    cache.set_in("short", "a", &1).unwrap();
    cache.set_in("long", "b", &2).unwrap();

    thread::sleep(Duration::from_millis(150));

    assert_eq!(cache.get_in::<i32>("short", "a").unwrap(), None);
    assert_eq!(cache.get_in::<i32>("long", "b").unwrap(), Some(2));
}

#[test]
fn test_lru_eviction() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::builder()
        .cache_dir(dir.path())
        .max_size_bytes(1000)
        .build();
    let cache = SkillCache::open("lru", config).unwrap();

    for key in ["A", "B", "C"] {
        cache.set(key, &payload(200)).unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    // Touch A so B becomes the least recently used
    assert!(cache.get::<String>("A").unwrap().is_some());
    thread::sleep(Duration::from_millis(5));

    cache.set("D", &payload(500)).unwrap();

    assert!(cache.get::<String>("B").unwrap().is_none());
    for key in ["A", "C", "D"] {
        assert!(cache.get::<String>(key).unwrap().is_some(), "{} evicted", key);
    }

    let stats = cache.stats().unwrap();
    assert_eq!(stats.total_size_bytes, 900);
}

#[test]
fn test_oversized_entry_is_kept() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::builder()
        .cache_dir(dir.path())
        .max_size_bytes(100)
        .build();
    let cache = SkillCache::open("oversized", config).unwrap();

    cache.set("small", &payload(50)).unwrap();
    cache.set("huge", &payload(400)).unwrap();

    assert!(cache.get::<String>("huge").unwrap().is_some());
    assert!(cache.get::<String>("small").unwrap().is_none());
}

#[test]
fn test_pattern_invalidation() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("patterns", config(&dir)).unwrap();

    cache.set_in("test", "user:1", "value1").unwrap();
    cache.set_in("test", "user:2", "value2").unwrap();
    cache.set_in("test", "other:1", "value3").unwrap();

    let count = cache
        .invalidate(&Invalidation::pattern("user:*").in_category("test"))
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(cache.get_in::<String>("test", "user:1").unwrap(), None);
    assert_eq!(
        cache.get_in::<String>("test", "other:1").unwrap(),
        Some("value3".to_string())
    );

    for name in ["file1.txt", "file2.txt", "file3.txt"] {
        cache.set_in("files", name, &name).unwrap();
    }
    let count = cache
        .invalidate(&Invalidation::pattern("file[1-2].txt"))
        .unwrap();
    assert_eq!(count, 2);
    assert!(cache.get_in::<String>("files", "file3.txt").unwrap().is_some());

    let count = cache
        .invalidate(&Invalidation::pattern("nonexistent:*").in_category("test"))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_key_and_category_invalidation() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("invalidate", config(&dir)).unwrap();

    cache.set_in("test", "key1", "value1").unwrap();
    cache.set_in("api", "a", &1).unwrap();
    cache.set_in("api", "b", &2).unwrap();

    assert_eq!(
        cache
            .invalidate(&Invalidation::key("key1").in_category("test"))
            .unwrap(),
        1
    );
    assert_eq!(cache.get_in::<String>("test", "key1").unwrap(), None);

    assert_eq!(cache.invalidate(&Invalidation::category("api")).unwrap(), 2);
    assert_eq!(cache.stats().unwrap().entry_count, 0);
}

#[test]
fn test_clear_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("clear", config(&dir)).unwrap();

    cache.set("a", &1).unwrap();
    cache.set_in("b", "b", &2).unwrap();

    assert_eq!(cache.clear().unwrap(), 2);
    assert_eq!(cache.clear().unwrap(), 0);
    assert_eq!(cache.stats().unwrap().entry_count, 0);
}

#[test]
fn test_cache_stats() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("stats", config(&dir)).unwrap();

    assert_eq!(cache.stats().unwrap().hit_rate, 0.0);

    cache.set_in("api", "k", "value").unwrap();
    cache.get_in::<String>("api", "k").unwrap();
    cache.get_in::<String>("api", "missing").unwrap();

    let stats = cache.stats().unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate, 0.5);
    assert_eq!(stats.by_category["api"].count, 1);
    assert_eq!(stats.by_category["api"].total_size_bytes, "\"value\"".len() as u64);
}

#[test]
fn test_persistence_across_reopen() {
    let dir = TempDir::new().unwrap();

    let cache = SkillCache::open("persist", config(&dir)).unwrap();
    cache.set_in("issue", "PROJ-1", "Open").unwrap();
    cache.close().unwrap();

    let reopened = SkillCache::open("persist", config(&dir)).unwrap();
    assert_eq!(
        reopened.get_in::<String>("issue", "PROJ-1").unwrap(),
        Some("Open".to_string())
    );

    // Counters belong to the instance
    let stats = reopened.stats().unwrap();
    assert_eq!((stats.hits, stats.misses), (1, 0));
}

#[test]
fn test_instances_share_directory() {
    let dir = TempDir::new().unwrap();
    let writer = SkillCache::open("shared", config(&dir)).unwrap();
    let reader = SkillCache::open("shared", config(&dir)).unwrap();
    let other = SkillCache::open("unrelated", config(&dir)).unwrap();

    writer.set("k", "v").unwrap();
    assert_eq!(reader.get::<String>("k").unwrap(), Some("v".to_string()));
    assert_eq!(other.get::<String>("k").unwrap(), None);

    reader.invalidate(&Invalidation::key("k")).unwrap();
    assert_eq!(writer.get::<String>("k").unwrap(), None);
}

#[test]
fn test_concurrent_cache_access() {
    let dir = TempDir::new().unwrap();
    SkillCache::open("concurrent", config(&dir))
        .unwrap()
        .clear()
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let config = config(&dir);
            thread::spawn(move || {
                let cache = SkillCache::open("concurrent", config).unwrap();
                for i in 0..25 {
                    let key = format!("w{}:{}", worker, i);
                    cache.set(&key, &i).unwrap();
                    assert_eq!(cache.get::<i32>(&key).unwrap(), Some(i));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let cache = SkillCache::open("concurrent", config(&dir)).unwrap();
    assert_eq!(cache.stats().unwrap().entry_count, 100);
}

#[test]
fn test_shared_handle_across_threads() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(SkillCache::open("shared-handle", config(&dir)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..10 {
                    cache.set_in("t", &format!("{}-{}", worker, i), &i).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.stats().unwrap().by_category["t"].count, 40);
}

#[test]
fn test_corrupt_database_recovered() {
    let dir = TempDir::new().unwrap();
    let cache_dir = dir.path().join("broken");
    std::fs::create_dir_all(&cache_dir).unwrap();
    std::fs::write(
        cache_dir.join("cache.db"),
        "this is not a database\n".repeat(512),
    )
    .unwrap();

    let cache = SkillCache::open("broken", config(&dir)).unwrap();
    assert_eq!(cache.get::<String>("k").unwrap(), None);
    cache.set("k", "fresh").unwrap();
    assert_eq!(cache.get::<String>("k").unwrap(), Some("fresh".to_string()));
}

#[test]
fn test_locked_database_surfaces_busy_error() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::builder()
        .cache_dir(dir.path())
        .busy_timeout(Duration::from_millis(200))
        .build();
    let cache = SkillCache::open("locked", config).unwrap();
    cache.set("k", &1).unwrap();

    let other = rusqlite::Connection::open(cache.database_path()).unwrap();
    other.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let started = Instant::now();
    let err = cache.set("k2", &2).unwrap_err();
    assert!(matches!(err, CacheError::StorageBusyError(_)), "{:?}", err);
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_millis(150));

    let err = cache.invalidate(&Invalidation::key("k")).unwrap_err();
    assert!(matches!(err, CacheError::StorageBusyError(_)), "{:?}", err);

    // Readers are not blocked by a writer in WAL mode.
    assert_eq!(cache.get::<i32>("k").unwrap(), Some(1));

    other.execute_batch("ROLLBACK").unwrap();
    cache.set("k2", &2).unwrap();
    assert_eq!(cache.get::<i32>("k2").unwrap(), Some(2));
    assert_eq!(cache.get::<i32>("k").unwrap(), Some(1));
}

#[cfg(unix)]
#[test]
fn test_directory_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("private", config(&dir)).unwrap();

    let mode = std::fs::metadata(cache.dir()).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o700);
}

#[test]
fn test_key_generation() {
    let dir = TempDir::new().unwrap();
    let cache = SkillCache::open("keys", config(&dir)).unwrap();

    let a = cache.generate_key("search", &[&"project = X"], &[("max", &10), ("at", &0)]);
    let b = cache.generate_key("search", &[&"project = X"], &[("at", &0), ("max", &10)]);
    assert_eq!(a, b);

    let long = "q".repeat(500);
    let key = cache.generate_key("search", &[&long], &[]);
    assert!(key.len() <= skill_cache::cache::MAX_KEY_LENGTH);

    cache.set_in("search", &key, &vec![1, 2, 3]).unwrap();
    assert_eq!(
        cache.get_in::<Vec<i32>>("search", &key).unwrap(),
        Some(vec![1, 2, 3])
    );
}

#[test]
fn test_memoization_through_registry() {
    let dir = TempDir::new().unwrap();
    let registry = CacheRegistry::new(config(&dir));
    let calls = AtomicUsize::new(0);

    let expensive = Memoized::new(registry.get("memo").unwrap(), "expensive", |x: u64| {
        calls.fetch_add(1, Ordering::SeqCst);
        x * 2
    })
    .category("test_decorator");

    assert_eq!(expensive.call(5), 10);
    assert_eq!(expensive.call(5), 10);
    assert_eq!(expensive.call(10), 20);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Another handle on the same cache sees the memoized results
    let other = Memoized::new(registry.get("memo").unwrap(), "expensive", |_: u64| 0u64)
        .category("test_decorator");
    assert_eq!(other.call(5), 10);

    assert!(Arc::ptr_eq(expensive.cache(), other.cache()));
}
