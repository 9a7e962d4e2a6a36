//! Configuration for the cache system

use crate::error::{CacheError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the base cache directory
pub const ENV_CACHE_DIR: &str = "SKILL_CACHE_DIR";
/// Environment variable overriding the size budget in bytes
pub const ENV_MAX_SIZE_BYTES: &str = "SKILL_CACHE_MAX_SIZE_BYTES";
/// Environment variable overriding the global TTL in seconds (`0`/`none` disables it)
pub const ENV_DEFAULT_TTL_SECS: &str = "SKILL_CACHE_DEFAULT_TTL_SECS";
/// Environment variable overriding the busy timeout in milliseconds
pub const ENV_BUSY_TIMEOUT_MS: &str = "SKILL_CACHE_BUSY_TIMEOUT_MS";

/// Configuration for a persistent cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Base directory; each cache name gets its own subdirectory
    pub cache_dir: PathBuf,

    /// Global default time-to-live.
    /// `None` means entries without an explicit or per-category TTL never expire.
    pub default_ttl: Option<Duration>,

    /// Soft budget for the total size of live entries in bytes
    pub max_size_bytes: u64,

    /// How long a writer waits on a locked database before giving up
    pub busy_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            // 1 hour
            default_ttl: Some(Duration::from_secs(3600)),
            // 100 MB
            max_size_bytes: 100 * 1024 * 1024,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Default base directory: `~/.assistant-skills/cache`
///
/// Falls back to the system temp directory when no home directory is known.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".assistant-skills")
        .join("cache")
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Build a configuration from the environment, loading `.env` first.
    ///
    /// Unset variables keep their defaults; malformed values are rejected.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|d| !d.trim().is_empty()) {
            config.cache_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup(ENV_MAX_SIZE_BYTES) {
            config.max_size_bytes = parse_number(ENV_MAX_SIZE_BYTES, &raw)?;
        }

        if let Some(raw) = lookup(ENV_DEFAULT_TTL_SECS) {
            let raw = raw.trim();
            config.default_ttl = if raw.eq_ignore_ascii_case("none") {
                None
            } else {
                match parse_number(ENV_DEFAULT_TTL_SECS, raw)? {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                }
            };
        }

        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout = Duration::from_millis(parse_number(ENV_BUSY_TIMEOUT_MS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(CacheError::ValidationError(
                "max_size_bytes must be greater than 0".to_string(),
            ));
        }

        if let Some(ttl) = self.default_ttl {
            validate_ttl("default_ttl", ttl)?;
        }

        if self.busy_timeout.is_zero() {
            return Err(CacheError::ValidationError(
                "busy_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Reject TTLs that would expire an entry at the moment it is written
pub(crate) fn validate_ttl(what: &str, ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(CacheError::ValidationError(format!(
            "{} must be greater than 0",
            what
        )));
    }
    Ok(())
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|e| {
        CacheError::ValidationError(format!(
            "{} must be a non-negative integer, got {:?}: {}",
            name, raw, e
        ))
    })
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    cache_dir: Option<PathBuf>,
    default_ttl: Option<Option<Duration>>,
    max_size_bytes: Option<u64>,
    busy_timeout: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set the base cache directory
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set the global default TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(Some(ttl));
        self
    }

    /// Store entries without a global default TTL
    pub fn no_default_ttl(mut self) -> Self {
        self.default_ttl = Some(None);
        self
    }

    /// Set the size budget in bytes
    pub fn max_size_bytes(mut self, size: u64) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set the busy timeout
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            busy_timeout: self.busy_timeout.unwrap_or(defaults.busy_timeout),
        }
    }
}
