//! Per-cache statistics counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::{ManagedObject, ManagedObjectKind};

/// Point-in-time copy of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub removals: u64,
    pub expirations: u64,
}

impl StatisticsSnapshot {
    pub fn gets(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit percentage of all gets; 0 when nothing was read.
    pub fn hit_percentage(&self) -> f64 {
        match self.gets() {
            0 => 0.0,
            gets => self.hits as f64 * 100.0 / gets as f64,
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removals(&self, count: u64) {
        self.removals.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.record_expirations(1);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.puts,
            &self.removals,
            &self.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl ManagedObject for CacheStatistics {
    fn kind(&self) -> ManagedObjectKind {
        ManagedObjectKind::Statistics
    }

    fn attributes(&self) -> serde_json::Value {
        let snapshot = self.snapshot();
        serde_json::json!({
            "cache_hits": snapshot.hits,
            "cache_misses": snapshot.misses,
            "cache_gets": snapshot.gets(),
            "cache_puts": snapshot.puts,
            "cache_removals": snapshot.removals,
            "cache_evictions": snapshot.expirations,
            "cache_hit_percentage": snapshot.hit_percentage(),
        })
    }
}
