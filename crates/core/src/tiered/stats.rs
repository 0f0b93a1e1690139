//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub secondary_hits: u64,
    pub misses: u64,
    /// Secondary hits copied back into the memory tier.
    pub backfills: u64,
    pub puts: u64,
    pub invalidations: u64,
    /// Memory entries dropped because their TTL ran out.
    pub expired_evictions: u64,
    pub secondary_errors: u64,
    pub memory_entries: usize,
    /// True when running memory-only because the secondary tier failed to start.
    pub degraded: bool,
    pub backend: String,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub memory_hits: AtomicU64,
    pub secondary_hits: AtomicU64,
    pub misses: AtomicU64,
    pub backfills: AtomicU64,
    pub puts: AtomicU64,
    pub invalidations: AtomicU64,
    pub expired_evictions: AtomicU64,
    pub secondary_errors: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, memory_entries: usize, degraded: bool, backend: &str) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            secondary_hits: self.secondary_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backfills: self.backfills.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            expired_evictions: self.expired_evictions.load(Ordering::Relaxed),
            secondary_errors: self.secondary_errors.load(Ordering::Relaxed),
            memory_entries,
            degraded,
            backend: backend.to_string(),
        }
    }
}
