//! The public cache handle
//!
//! A `SkillCache` is bound to one `(name, directory)` pair. The directory is
//! created when the handle is built; the database is opened on first use and
//! reopened after a corruption error.

use crate::cache::config::{validate_ttl, CacheConfig};
use crate::cache::entry::EntryMetadata;
use crate::cache::invalidation::{self, Invalidation};
use crate::cache::key;
use crate::cache::policy::{enforce_budget, TtlPolicy};
use crate::cache::stats::StatsRecorder;
use crate::cache::store::{prepare_cache_dir, remove_database_files, CacheStore, DATABASE_FILE};
use crate::cache::types::{CacheStats, DEFAULT_CATEGORY};
use crate::error::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Persistent cache for one tool
pub struct SkillCache {
    name: String,
    config: CacheConfig,
    dir: PathBuf,
    store: Mutex<Option<CacheStore>>,
    ttl: RwLock<TtlPolicy>,
    stats: StatsRecorder,
}

impl fmt::Debug for SkillCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillCache")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SkillCache {
    /// Create a cache named `name` under `config.cache_dir`.
    ///
    /// Fails on invalid configuration or name, or if the directory cannot be
    /// created with owner-only permissions.
    pub fn open(name: impl Into<String>, config: CacheConfig) -> Result<Self> {
        let name = name.into();
        config.validate()?;
        let dir = prepare_cache_dir(&config.cache_dir, &name)?;

        debug!(cache = %name, dir = %dir.display(), "cache created");

        Ok(Self {
            ttl: RwLock::new(TtlPolicy::new(config.default_ttl)),
            name,
            config,
            dir,
            store: Mutex::new(None),
            stats: StatsRecorder::new(),
        })
    }

    /// Create a cache with default settings under `cache_dir`
    pub fn open_in(name: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(name, CacheConfig::builder().cache_dir(cache_dir).build())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directory holding this cache's database
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the database file
    pub fn database_path(&self) -> PathBuf {
        self.dir.join(DATABASE_FILE)
    }

    /// Store `value` under `key` in the default category
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.write_entry(DEFAULT_CATEGORY, key, value, None)
    }

    /// Store `value` under `(category, key)`
    pub fn set_in<T>(&self, category: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.write_entry(category, key, value, None)
    }

    /// Store `value` with an explicit TTL, overriding any default
    pub fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        category: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        validate_ttl("ttl", ttl)?;
        self.write_entry(category, key, value, Some(ttl))
    }

    fn write_entry<T: Serialize + ?Sized>(
        &self,
        category: &str,
        key: &str,
        value: &T,
        explicit_ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let ttl = self
            .ttl
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(category, explicit_ttl);

        let now = Utc::now();
        let metadata = EntryMetadata::new(now, ttl, payload.len() as u64);
        let budget = self.config.max_size_bytes;

        let evicted = self.with_store(|store| {
            store.write(|store| {
                store.put(category, key, &payload, &metadata)?;
                enforce_budget(store, budget, (category, key), now)
            })
        })?;

        debug!(
            cache = %self.name,
            category,
            key,
            size_bytes = metadata.size_bytes,
            ttl_secs = ttl.map(|t| t.as_secs_f64()),
            evicted,
            "cache set"
        );
        Ok(())
    }

    /// Look up `key` in the default category
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_in(DEFAULT_CATEGORY, key)
    }

    /// Look up `(category, key)`.
    ///
    /// Absent, expired and undecodable entries are all misses.
    pub fn get_in<T: DeserializeOwned>(&self, category: &str, key: &str) -> Result<Option<T>> {
        let now = Utc::now();
        let entry = match self.with_store(|store| store.get(category, key, now)) {
            Ok(entry) => entry,
            Err(e) => {
                self.stats.record_miss();
                return Err(e);
            }
        };

        let Some(entry) = entry else {
            self.stats.record_miss();
            debug!(cache = %self.name, category, key, "cache miss");
            return Ok(None);
        };

        match entry.decode::<T>() {
            Ok(value) => {
                self.stats.record_hit();
                debug!(cache = %self.name, category, key, "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                self.stats.record_miss();
                warn!(cache = %self.name, category, key, error = %e, "unreadable cache payload");
                Ok(None)
            }
        }
    }

    /// Return the cached value, or compute, store and return it
    pub fn get_or_insert_with<T, F>(&self, category: &str, key: &str, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get_in(category, key)? {
            return Ok(value);
        }

        let value = compute();
        self.set_in(category, key, &value)?;
        Ok(value)
    }

    /// Remove the entries selected by `request`; returns how many were removed
    pub fn invalidate(&self, request: &Invalidation) -> Result<usize> {
        if request.is_empty() {
            return Ok(0);
        }

        let removed = self.with_store(|store| invalidation::apply(store, request))?;
        info!(cache = %self.name, request = %request, removed, "cache invalidated");
        Ok(removed)
    }

    /// Remove every entry; returns how many were removed
    pub fn clear(&self) -> Result<usize> {
        let removed = self.with_store(|store| store.delete_all())?;
        info!(cache = %self.name, removed, "cache cleared");
        Ok(removed)
    }

    /// Delete rows that have already expired
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let removed = self.with_store(|store| store.purge_expired(now))?;
        if removed > 0 {
            info!(cache = %self.name, removed, "expired entries purged");
        }
        Ok(removed)
    }

    /// Current contents and this handle's hit/miss counters
    pub fn stats(&self) -> Result<CacheStats> {
        let now = Utc::now();
        self.with_store(|store| self.stats.snapshot(store, now))
    }

    /// Merge per-category default TTLs; rejects zero TTLs without applying any
    pub fn set_ttl_defaults<I, S>(&self, defaults: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Duration)>,
        S: Into<String>,
    {
        self.ttl
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_category_defaults(defaults)
    }

    /// See [`key::generate_key`]
    pub fn generate_key(
        &self,
        category: &str,
        parts: &[&dyn Display],
        named: &[(&str, &dyn Display)],
    ) -> String {
        key::generate_key(category, parts, named)
    }

    /// Close the database connection, surfacing any close error
    pub fn close(self) -> Result<()> {
        let store = self
            .store
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        match store {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }

    /// Run `f` against the store, opening it on first use.
    ///
    /// A corruption error discards the database so the next call starts
    /// from an empty store.
    fn with_store<R>(&self, f: impl FnOnce(&CacheStore) -> Result<R>) -> Result<R> {
        let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);

        let store = match guard.take() {
            Some(store) => store,
            None => {
                let store = CacheStore::open(
                    &self.name,
                    &self.config.cache_dir,
                    self.config.busy_timeout,
                )?;
                info!(cache = %self.name, path = %store.path().display(), "cache store opened");
                store
            }
        };

        let result = f(&store);
        match &result {
            Err(e) if e.is_corruption() => {
                let path = store.path().to_path_buf();
                drop(store);
                warn!(
                    cache = %self.name,
                    path = %path.display(),
                    error = %e,
                    "cache database corrupt; discarding"
                );
                if let Err(remove_err) = remove_database_files(&path) {
                    warn!(
                        cache = %self.name,
                        error = %remove_err,
                        "failed to discard corrupt cache"
                    );
                }
            }
            _ => *guard = Some(store),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use serde::Deserialize;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> SkillCache {
        SkillCache::open_in("unit", dir.path()).unwrap()
    }

    #[test]
    fn test_open_creates_directory_lazily_opens_db() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);

        assert!(cache.dir().is_dir());
        assert!(!cache.database_path().exists());

        cache.set("k", &1).unwrap();
        assert!(cache.database_path().exists());
    }

    #[test]
    fn test_open_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SkillCache::open_in("../escape", dir.path()),
            Err(CacheError::ValidationError(_))
        ));

        let config = CacheConfig::builder()
            .cache_dir(dir.path())
            .max_size_bytes(0)
            .build();
        assert!(matches!(
            SkillCache::open("ok", config),
            Err(CacheError::ValidationError(_))
        ));
    }

    #[test]
    fn test_set_and_get_typed_values() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Issue {
            key: String,
            points: u32,
        }

        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let issue = Issue {
            key: "PROJ-1".to_string(),
            points: 3,
        };

        cache.set_in("issue", "PROJ-1", &issue).unwrap();
        assert_eq!(cache.get_in::<Issue>("issue", "PROJ-1").unwrap(), Some(issue));
        assert_eq!(cache.get::<Issue>("PROJ-1").unwrap(), None);

        cache.set("nothing", &serde_json::Value::Null).unwrap();
        assert_eq!(
            cache.get::<serde_json::Value>("nothing").unwrap(),
            Some(serde_json::Value::Null)
        );
    }

    #[test]
    fn test_wrong_type_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", "text").unwrap();

        assert_eq!(cache.get::<u64>("k").unwrap(), None);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_malformed_payload_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", &1).unwrap();

        let conn = rusqlite::Connection::open(cache.database_path()).unwrap();
        let updated = conn
            .execute("UPDATE entries SET value = '{not json' WHERE key = 'k'", [])
            .unwrap();
        assert_eq!(updated, 1);
        drop(conn);

        assert_eq!(cache.get::<i32>("k").unwrap(), None);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.entry_count, 1);

        cache.set("k", &2).unwrap();
        assert_eq!(cache.get::<i32>("k").unwrap(), Some(2));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);

        let err = cache
            .set_with_ttl("default", "k", &1, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, CacheError::ValidationError(_)));
        assert!(cache.set_ttl_defaults([("api", Duration::ZERO)]).is_err());
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let mut calls = 0;

        let first: u32 = cache
            .get_or_insert_with("math", "answer", || {
                calls += 1;
                42
            })
            .unwrap();
        let second: u32 = cache
            .get_or_insert_with("math", "answer", || {
                calls += 1;
                0
            })
            .unwrap();

        assert_eq!((first, second, calls), (42, 42, 1));
    }

    #[test]
    fn test_empty_invalidation_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.set("k", &1).unwrap();

        assert_eq!(cache.invalidate(&Invalidation::default()).unwrap(), 0);
        assert_eq!(cache.get::<i32>("k").unwrap(), Some(1));
    }

    #[test]
    fn test_close_without_use() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        assert!(cache.close().is_ok());
    }

    #[test]
    fn test_generate_key_method() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        assert_eq!(
            cache.generate_key("api", &[&"users"], &[("page", &1)]),
            "api:users:page=1"
        );
    }

    #[test]
    fn test_cache_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SkillCache>();
    }
}
