//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category used when the caller does not name one
pub const DEFAULT_CATEGORY: &str = "default";

/// Live entry count and bytes for one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    /// Number of live entries
    pub count: u64,

    /// Sum of serialized payload sizes
    pub total_size_bytes: u64,
}

/// Snapshot of cache contents and lookup performance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries at snapshot time
    pub entry_count: u64,

    /// Rows already expired but not yet purged
    pub expired_count: u64,

    /// Total size of live entries in bytes
    pub total_size_bytes: u64,

    /// Lookups that returned a value since this instance was created
    pub hits: u64,

    /// Lookups that found nothing, an expired entry, or an unreadable payload
    pub misses: u64,

    /// `hits / (hits + misses)`, `0.0` before any lookup
    pub hit_rate: f64,

    /// Per-category breakdown of live entries
    pub by_category: BTreeMap<String, CategoryStats>,
}

impl CacheStats {
    /// Total lookups recorded
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Compute the hit rate for the given counters
    pub fn rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ entries: {}, expired: {}, size: {} bytes, \
             hits: {}, misses: {}, hit_rate: {:.2}% }}",
            self.entry_count,
            self.expired_count,
            self.total_size_bytes,
            self.hits,
            self.misses,
            self.hit_rate * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::rate(80, 20), 0.8);
        assert_eq!(CacheStats::rate(1, 1), 0.5);
    }

    #[test]
    fn test_hit_rate_zero_requests() {
        assert_eq!(CacheStats::rate(0, 0), 0.0);
        assert_eq!(CacheStats::default().lookups(), 0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            entry_count: 75,
            expired_count: 2,
            total_size_bytes: 1024,
            hits: 100,
            misses: 50,
            hit_rate: CacheStats::rate(100, 50),
            by_category: BTreeMap::new(),
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
        assert!(display.contains("66.67%"));
    }

    #[test]
    fn test_stats_serialize() {
        let mut stats = CacheStats::default();
        stats.by_category.insert(
            "api".to_string(),
            CategoryStats {
                count: 2,
                total_size_bytes: 40,
            },
        );

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["by_category"]["api"]["count"], 2);
        assert_eq!(json["hit_rate"], 0.0);
    }
}
