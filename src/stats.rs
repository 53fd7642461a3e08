//! Statistics and loading status for the cache.
//!
//! Counters are atomic so they can be read from any handle without locking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for cache operations.
///
/// Use `Cache::stats()` to get a snapshot of the current statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads answered from a fresh entry.
    hits: AtomicU64,

    /// Reads that found nothing, or only a stale entry.
    misses: AtomicU64,

    /// Calls made to the single-item loader.
    loads: AtomicU64,

    /// Single-item or bulk loads that failed.
    load_failures: AtomicU64,

    /// Named query calls answered from the query cache.
    query_hits: AtomicU64,

    /// Named query calls that ran the query function.
    query_misses: AtomicU64,

    /// Entries written, one per item in a batch.
    sets: AtomicU64,

    /// Entries removed by `delete` or `delete_by`.
    deletes: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_hit(&self) {
        self.query_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_miss(&self) {
        self.query_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sets(&self, count: u64) {
        self.sets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    pub fn query_hits(&self) -> u64 {
        self.query_hits.load(Ordering::Relaxed)
    }

    pub fn query_misses(&self) -> u64 {
        self.query_misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Calculate the hit rate as a percentage (0.0 to 100.0).
    /// Returns 0.0 if no reads have been performed.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            loads: self.loads(),
            load_failures: self.load_failures(),
            query_hits: self.query_hits(),
            query_misses: self.query_misses(),
            sets: self.sets(),
            deletes: self.deletes(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub query_hits: u64,
    pub query_misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hit_rate: f64,
}

/// Which loads are currently outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingStatus {
    /// A bulk load is in flight.
    pub all: bool,
    /// Number of keys with a single-item load in flight.
    pub keys: usize,
    /// Number of named query calls in flight.
    pub queries: usize,
}

impl LoadingStatus {
    pub fn is_loading(&self) -> bool {
        self.all || self.keys > 0 || self.queries > 0
    }
}
