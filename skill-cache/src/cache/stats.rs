//! Hit/miss counters and stats snapshots
//!
//! Counters live in memory and belong to one cache instance; entry counts and
//! sizes are read from the store, so they reflect every process sharing it.

use crate::cache::store::CacheStore;
use crate::cache::types::CacheStats;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Combine the counters with store aggregates taken at `now`
    pub fn snapshot(&self, store: &CacheStore, now: DateTime<Utc>) -> Result<CacheStats> {
        let hits = self.hits();
        let misses = self.misses();

        let by_category = store.category_summary(now)?;
        let entry_count = by_category.values().map(|c| c.count).sum();
        let total_size_bytes = by_category.values().map(|c| c.total_size_bytes).sum();

        Ok(CacheStats {
            entry_count,
            expired_count: store.expired_count(now)?,
            total_size_bytes,
            hits,
            misses,
            hit_rate: CacheStats::rate(hits, misses),
            by_category,
        })
    }
}
