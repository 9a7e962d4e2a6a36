//! # Skill Cache (skill-cache)
//!
//! A persistent local cache for command-line assistant tools.
//!
//! ## Features
//!
//! - SQLite storage, one database per cache name
//! - Safe for concurrent use by many processes and threads
//! - Per-entry expiration with category defaults
//! - Size budget with least-recently-used eviction
//! - Invalidation by key, glob pattern, or category
//! - Typed values through serde
//!
//! ## Basic Usage
//!
//! ```no_run
//! use skill_cache::{CacheConfig, SkillCache};
//!
//! fn main() -> anyhow::Result<()> {
//!     let cache = SkillCache::open("confluence", CacheConfig::from_env()?)?;
//!
//!     cache.set_in("page", "12345", &"Release notes")?;
//!     let title: Option<String> = cache.get_in("page", "12345")?;
//!     println!("Cached title: {:?}", title);
//!
//!     println!("{}", cache.stats()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Expiration
//!
//! Each write resolves its TTL once: an explicit TTL, then the category
//! default, then the global default.
//!
//! ```no_run
//! use skill_cache::{Invalidation, SkillCache};
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cache = SkillCache::open_in("jira", "/tmp/skill-caches")?;
//!     cache.set_ttl_defaults([
//!         ("field", Duration::from_secs(24 * 3600)),
//!         ("search", Duration::from_secs(60)),
//!     ])?;
//!
//!     let key = cache.generate_key("search", &[&"project = PROJ"], &[("max", &50)]);
//!     cache.set_in("search", &key, &vec!["PROJ-1", "PROJ-2"])?;
//!     cache.set_with_ttl("issue", "PROJ-1", &"In Progress", Duration::from_secs(5))?;
//!
//!     // Drop every cached search
//!     cache.invalidate(&Invalidation::category("search"))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Shared Instances
//!
//! ```no_run
//! use skill_cache::{CacheRegistry, Memoized};
//!
//! fn main() -> anyhow::Result<()> {
//!     let registry = CacheRegistry::from_env()?;
//!     let cache = registry.get("jira")?;
//!
//!     let fetch = Memoized::new(cache, "fetch_issue", |id: String| format!("issue {}", id))
//!         .category("issue");
//!     println!("{}", fetch.call("PROJ-7".to_string()));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    generate_key, CacheConfig, CacheConfigBuilder, CacheEntry, CacheRegistry, CacheStats,
    CategoryStats, EntryMetadata, Invalidation, KeyBuilder, Memoized, SkillCache,
    DEFAULT_CATEGORY,
};
pub use error::{CacheError, Result};
