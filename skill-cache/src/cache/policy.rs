//! TTL resolution and size-budget eviction
//!
//! TTL is resolved once, at write time: explicit TTL, then the category
//! default, then the global default, otherwise the entry never expires.
//!
//! Eviction runs inside the write that pushed live data over budget. Live
//! entries are removed least-recently-used first until the excess is covered;
//! the entry just written is never a candidate, so a value larger than the
//! whole budget is still kept.

use crate::cache::config::validate_ttl;
use crate::cache::store::{CacheStore, EntrySummary, ScanOrder};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::debug;

/// Resolves the effective TTL of a write
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    default_ttl: Option<Duration>,
    category_ttls: HashMap<String, Duration>,
}

impl TtlPolicy {
    /// Create a policy with the given global default
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            default_ttl,
            category_ttls: HashMap::new(),
        }
    }

    /// Merge per-category defaults into the policy.
    ///
    /// Nothing is applied if any TTL is zero.
    pub fn set_category_defaults<I, S>(&mut self, defaults: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Duration)>,
        S: Into<String>,
    {
        let defaults: Vec<(String, Duration)> = defaults
            .into_iter()
            .map(|(category, ttl)| (category.into(), ttl))
            .collect();

        for (category, ttl) in &defaults {
            validate_ttl(&format!("TTL for category {:?}", category), *ttl)?;
        }

        self.category_ttls.extend(defaults);
        Ok(())
    }

    /// Per-category default, if one is registered
    pub fn category_default(&self, category: &str) -> Option<Duration> {
        self.category_ttls.get(category).copied()
    }

    /// Effective TTL for a write into `category`
    pub fn resolve(&self, category: &str, explicit: Option<Duration>) -> Option<Duration> {
        explicit
            .or_else(|| self.category_default(category))
            .or(self.default_ttl)
    }
}

/// Collects eviction victims from an LRU-ordered stream of live entries
#[derive(Debug)]
pub(crate) struct EvictionPlanner<'a> {
    excess: u64,
    freed: u64,
    protected: (&'a str, &'a str),
    victims: Vec<(String, String)>,
}

impl<'a> EvictionPlanner<'a> {
    pub(crate) fn new(excess: u64, protected: (&'a str, &'a str)) -> Self {
        Self {
            excess,
            freed: 0,
            protected,
            victims: Vec::new(),
        }
    }

    /// Consider the next candidate; breaks once enough bytes are freed.
    pub(crate) fn offer(&mut self, candidate: EntrySummary) -> ControlFlow<()> {
        if self.freed >= self.excess {
            return ControlFlow::Break(());
        }
        if candidate.category == self.protected.0 && candidate.key == self.protected.1 {
            return ControlFlow::Continue(());
        }

        self.freed += candidate.metadata.size_bytes;
        self.victims.push((candidate.category, candidate.key));

        if self.freed >= self.excess {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    pub(crate) fn freed(&self) -> u64 {
        self.freed
    }

    pub(crate) fn into_victims(self) -> Vec<(String, String)> {
        self.victims
    }
}

/// Evict least-recently-used live entries until the budget holds.
///
/// Returns the number of rows evicted. Call inside the write transaction of
/// the `set` that wrote `protected`.
pub(crate) fn enforce_budget(
    store: &CacheStore,
    budget: u64,
    protected: (&str, &str),
    now: DateTime<Utc>,
) -> Result<usize> {
    let total = store.total_size(None, Some(now))?;
    if total <= budget {
        return Ok(0);
    }

    let mut planner = EvictionPlanner::new(total - budget, protected);
    store.scan(None, Some(now), ScanOrder::LeastRecentlyUsed, |candidate| {
        planner.offer(candidate)
    })?;

    let freed = planner.freed();
    let victims = planner.into_victims();
    let evicted = store.delete_keys(&victims)?;

    debug!(
        evicted,
        freed_bytes = freed,
        total_bytes = total,
        budget,
        "LRU eviction"
    );
    Ok(evicted)
}
