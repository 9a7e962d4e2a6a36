//! Named cache instances shared within a process
//!
//! The registry hands out one `Arc<SkillCache>` per name, created on first
//! use with the registry's configuration. It is an ordinary value: build one
//! where the application starts and pass it to whoever needs caches.

use crate::cache::config::CacheConfig;
use crate::cache::invalidation::Invalidation;
use crate::cache::skill_cache::SkillCache;
use crate::error::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug)]
pub struct CacheRegistry {
    config: CacheConfig,
    caches: Mutex<HashMap<(String, PathBuf), Arc<SkillCache>>>,
}

impl CacheRegistry {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Registry configured from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(CacheConfig::from_env()?))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The cache for `name` in the configured directory
    pub fn get(&self, name: &str) -> Result<Arc<SkillCache>> {
        self.get_in(name, self.config.cache_dir.clone())
    }

    /// The cache for `name` under a specific base directory
    pub fn get_in(&self, name: &str, cache_dir: impl Into<PathBuf>) -> Result<Arc<SkillCache>> {
        let cache_dir = cache_dir.into();
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);

        let slot = (name.to_string(), cache_dir);
        if let Some(cache) = caches.get(&slot) {
            return Ok(Arc::clone(cache));
        }

        let config = CacheConfig {
            cache_dir: slot.1.clone(),
            ..self.config.clone()
        };
        let cache = Arc::new(SkillCache::open(name, config)?);
        debug!(cache = name, dir = %slot.1.display(), "registered cache");
        caches.insert(slot, Arc::clone(&cache));
        Ok(cache)
    }

    /// Invalidate entries in the named cache (configured directory)
    pub fn invalidate(&self, name: &str, request: &Invalidation) -> Result<usize> {
        self.get(name)?.invalidate(request)
    }

    /// Forget the named cache; returns whether it was registered.
    ///
    /// Outstanding handles keep working; the next `get` builds a new one.
    pub fn remove(&self, name: &str) -> bool {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        let before = caches.len();
        caches.retain(|(cache_name, _), _| cache_name != name);
        caches.len() != before
    }

    /// Forget every cache
    pub fn clear(&self) {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
