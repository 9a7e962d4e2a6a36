//! Function memoization on top of a [`SkillCache`]
//!
//! Calls are keyed by the function name plus the JSON form of the arguments.
//! The cache is an optimization here: storage failures are logged and the
//! wrapped function is called as if the cache were empty.

use crate::cache::key::KeyBuilder;
use crate::cache::skill_cache::SkillCache;
use crate::cache::types::DEFAULT_CATEGORY;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A function whose results are cached by argument
///
/// ```no_run
/// use skill_cache::{Memoized, SkillCache};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn main() -> skill_cache::Result<()> {
/// let cache = Arc::new(SkillCache::open_in("jira", "/tmp/skill-caches")?);
/// let lookup = Memoized::new(cache, "issue_summary", |id: String| format!("summary of {}", id))
///     .category("issue")
///     .ttl(Duration::from_secs(300));
///
/// let first = lookup.call("PROJ-1".to_string());
/// let again = lookup.call("PROJ-1".to_string()); // served from the cache
/// assert_eq!(first, again);
/// # Ok(())
/// # }
/// ```
pub struct Memoized<F> {
    cache: Arc<SkillCache>,
    name: String,
    category: String,
    ttl: Option<Duration>,
    func: F,
}

impl<F> Memoized<F> {
    pub fn new(cache: Arc<SkillCache>, name: impl Into<String>, func: F) -> Self {
        Self {
            cache,
            name: name.into(),
            category: DEFAULT_CATEGORY.to_string(),
            ttl: None,
            func,
        }
    }

    /// Store results under `category` instead of the default one
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Store results with an explicit TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache(&self) -> &Arc<SkillCache> {
        &self.cache
    }

    /// Cache key used for a call with `args`
    pub fn key_for<A: Serialize + ?Sized>(&self, args: &A) -> Result<String> {
        let args = serde_json::to_string(args)?;
        Ok(KeyBuilder::new(&self.category)
            .part(&self.name)
            .part(args)
            .build())
    }

    fn cached_key<A: Serialize>(&self, args: &A) -> Option<String> {
        match self.key_for(args) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(function = %self.name, error = %e, "arguments not serializable; not caching");
                None
            }
        }
    }

    /// Call through the cache
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
        A: Serialize,
        R: Serialize + DeserializeOwned,
    {
        let Some(key) = self.cached_key(&args) else {
            return (self.func)(args);
        };
        if let Some(cached) = self.lookup(&key) {
            return cached;
        }

        let result = (self.func)(args);
        self.store(&key, &result);
        result
    }

    /// Call through the cache, caching only successful results
    pub fn try_call<A, R, E>(&self, args: A) -> std::result::Result<R, E>
    where
        F: Fn(A) -> std::result::Result<R, E>,
        A: Serialize,
        R: Serialize + DeserializeOwned,
    {
        let Some(key) = self.cached_key(&args) else {
            return (self.func)(args);
        };
        if let Some(cached) = self.lookup(&key) {
            return Ok(cached);
        }

        let result = (self.func)(args)?;
        self.store(&key, &result);
        Ok(result)
    }

    fn lookup<R: DeserializeOwned>(&self, key: &str) -> Option<R> {
        match self.cache.get_in(&self.category, key) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    function = %self.name,
                    key,
                    error = %e,
                    "memo lookup failed; calling through"
                );
                None
            }
        }
    }

    fn store<R: Serialize>(&self, key: &str, result: &R) {
        let stored = match self.ttl {
            Some(ttl) => self.cache.set_with_ttl(&self.category, key, result, ttl),
            None => self.cache.set_in(&self.category, key, result),
        };
        if let Err(e) = stored {
            warn!(function = %self.name, key, error = %e, "failed to cache memoized result");
        }
    }
}
