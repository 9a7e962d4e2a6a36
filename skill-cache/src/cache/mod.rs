//! # Persistent Local Cache
//!
//! A disk-backed key/value cache for short-lived command-line tools. Each
//! cache name maps to its own SQLite database, so separate invocations of the
//! same tool share results while different tools stay isolated.
//!
//! ## Features
//!
//! - **Categories**: entries are keyed by `(category, key)`
//! - **TTL Expiration**: explicit, per-category, or global time-to-live
//! - **LRU Eviction**: a size budget enforced on every write
//! - **Invalidation**: by key, glob pattern, or category
//! - **Stats**: hit/miss counters and per-category sizes
//! - **Multi-Process Safety**: WAL journaling and a busy timeout
//!
//! ## Architecture
//!
//! - [`store`]: the on-disk table and its queries
//! - [`policy`]: TTL resolution and eviction
//! - [`invalidation`]: key/pattern/category deletes
//! - [`stats`]: counters and snapshots
//! - [`skill_cache`]: the public handle tying them together
//!
//! ## Example
//!
//! ```no_run
//! use skill_cache::cache::{CacheConfig, Invalidation, SkillCache};
//! use std::time::Duration;
//!
//! # fn example() -> skill_cache::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(3600)) // 1 hour
//!     .max_size_bytes(100 * 1024 * 1024) // 100 MB
//!     .build();
//!
//! let cache = SkillCache::open("jira", config)?;
//! cache.set_in("issue", "PROJ-123", &serde_json::json!({"status": "Open"}))?;
//!
//! if let Some(issue) = cache.get_in::<serde_json::Value>("issue", "PROJ-123")? {
//!     println!("Cache hit: {}", issue);
//! }
//!
//! cache.invalidate(&Invalidation::pattern("PROJ-*").in_category("issue"))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod memo;
pub mod policy;
pub mod registry;
pub mod skill_cache;
pub mod stats;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, EntryMetadata};
pub use invalidation::{GlobPattern, Invalidation, PatternKind};
pub use key::{generate_key, KeyBuilder, KEY_DELIMITER, MAX_KEY_LENGTH};
pub use memo::Memoized;
pub use policy::TtlPolicy;
pub use registry::CacheRegistry;
pub use skill_cache::SkillCache;
pub use store::{CacheStore, EntrySummary, ScanOrder};
pub use types::{CacheStats, CategoryStats, DEFAULT_CATEGORY};
