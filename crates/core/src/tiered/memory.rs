//! In-process memory tier.
//!
//! Strict LRU over a fixed capacity with a per-entry deadline. The lock is
//! held only for map mutation, never across I/O.
//!
//! Every invalidation stamps the product with a fresh value from a
//! monotonic counter, under the same lock. A caller that read the secondary
//! tier passes the generation it observed beforehand to
//! [`MemoryTier::insert_if_generation`], so a backfill that raced an
//! invalidation is dropped instead of resurrecting the removed value.
//!
//! Products without a stamp share a floor generation. The stamp map is
//! cleared once it grows past a limit; the floor then moves above every
//! generation handed out so far, so tokens observed before the clear can
//! no longer match.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::CacheValue;
use super::key::CacheKey;

struct MemoryEntry {
    value: CacheValue,
    expires_at: Instant,
}

/// Deadline used when `now + ttl` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Fewest invalidation stamps kept before the map is cleared.
const MIN_GENERATION_LIMIT: usize = 1_024;

struct MemoryState {
    entries: LruCache<CacheKey, MemoryEntry>,
    generations: HashMap<String, u64>,
    /// Last generation handed out.
    counter: u64,
    /// Generation of every product without a stamp.
    floor: u64,
    generation_limit: usize,
}

/// `now + ttl`, saturating to a far-future deadline.
fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

impl MemoryState {
    fn generation(&self, product_id: &str) -> u64 {
        self.generations.get(product_id).copied().unwrap_or(self.floor)
    }

    fn stamp(&mut self, product_id: &str) {
        if self.generations.len() >= self.generation_limit {
            self.generations.clear();
            self.counter += 1;
            self.floor = self.counter;
        }
        self.counter += 1;
        self.generations.insert(product_id.to_string(), self.counter);
    }

    /// Insert and report the key pushed out by LRU, if any.
    fn insert(&mut self, key: CacheKey, value: CacheValue, ttl: Duration) -> Option<CacheKey> {
        let entry = MemoryEntry { value, expires_at: deadline(ttl) };
        match self.entries.push(key.clone(), entry) {
            Some((old_key, _)) if old_key != key => Some(old_key),
            _ => None,
        }
    }
}

/// Result of a memory tier lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryLookup {
    Hit(CacheValue),
    /// The entry existed but had expired; it has been removed.
    Expired,
    Miss,
}

pub struct MemoryTier {
    state: Mutex<MemoryState>,
    ttl: Duration,
}

impl MemoryTier {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let state = MemoryState {
            entries: LruCache::new(capacity),
            generations: HashMap::new(),
            counter: 0,
            floor: 0,
            generation_limit: capacity.get().max(MIN_GENERATION_LIMIT),
        };
        Self { state: Mutex::new(state), ttl }
    }

    /// Look up a key, promoting it on a hit.
    ///
    /// Also returns the product's current generation, read under the same lock.
    pub fn lookup(&self, key: &CacheKey) -> (MemoryLookup, u64) {
        let mut state = self.state.lock();
        let generation = state.generation(key.product_id());

        let expired = match state.entries.peek(key) {
            None => return (MemoryLookup::Miss, generation),
            Some(entry) => Instant::now() >= entry.expires_at,
        };
        if expired {
            state.entries.pop(key);
            return (MemoryLookup::Expired, generation);
        }

        match state.entries.get(key) {
            Some(entry) => (MemoryLookup::Hit(entry.value.clone()), generation),
            None => (MemoryLookup::Miss, generation),
        }
    }

    /// Insert unconditionally. Returns the key evicted to make room, if any.
    pub fn insert(&self, key: CacheKey, value: CacheValue) -> Option<CacheKey> {
        self.state.lock().insert(key, value, self.ttl)
    }

    /// Insert only if the product has not been invalidated since `generation`
    /// was observed. Returns whether the value was inserted.
    pub fn insert_if_generation(&self, key: CacheKey, value: CacheValue, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation(key.product_id()) != generation {
            return false;
        }
        state.insert(key, value, self.ttl);
        true
    }

    /// Remove every entry of a product, whatever its resource set, and bump
    /// the product's generation. Returns the number of removed entries.
    pub fn invalidate(&self, product_id: &str) -> usize {
        let mut state = self.state.lock();
        state.stamp(product_id);

        let doomed: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(key, _)| key.product_id() == product_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.entries.pop(key);
        }
        doomed.len()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        expired.len()
    }

    /// Live value for a key without promoting it or removing it when expired.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheValue> {
        let state = self.state.lock();
        state
            .entries
            .peek(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    /// Whether a live or expired entry is present, without touching LRU order.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().entries.cap().get()
    }
}
