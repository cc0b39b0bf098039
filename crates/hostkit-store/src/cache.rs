//! Per-table caches: bounded read cache and unbounded write-back buffer.
//!
//! The read cache is a deterministic insertion-order bound: inserting past
//! capacity evicts exactly the oldest entry, nothing more.  Replacing an
//! existing key keeps its slot.  The write buffer maps keys to their most
//! recent pending `(tag, payload)` — last-write-wins by construction — and
//! supports an atomic drain so a flush and a concurrent `set` can never
//! split a write between two batches.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::codec::Decoded;
use crate::db::StoredRow;

// ── capacity ─────────────────────────────────────────────────────────

/// Read-cache capacity, fixed at table-open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unbounded,
    Bounded(usize),
}

impl Capacity {
    /// Interpret a raw configuration value: negative means unbounded.
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Capacity::Unbounded
        } else {
            Capacity::Bounded(raw as usize)
        }
    }
}

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking read-cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Total cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total evictions since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0 (0.0 if no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.evictions(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── read cache ───────────────────────────────────────────────────────

struct ReadCacheInner {
    map: HashMap<String, Decoded>,
    /// Insertion order; front is oldest.
    order: VecDeque<String>,
}

/// Bounded map of decoded values keyed like the backing table.
///
/// Eviction is insertion-order (FIFO): one insert over capacity evicts
/// exactly one entry, the least recently inserted.
pub struct ReadCache {
    capacity: Capacity,
    inner: Mutex<ReadCacheInner>,
    stats: CacheStats,
}

impl ReadCache {
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            inner: Mutex::new(ReadCacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            stats: CacheStats::default(),
        }
    }

    /// Look up a cached value.  Returns a cheap `Arc` clone on hit.
    pub fn get(&self, key: &str) -> Option<Decoded> {
        let inner = self.inner.lock().expect("read cache lock poisoned");
        match inner.map.get(key) {
            Some(value) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value.  Replacement keeps the key's eviction
    /// slot; a fresh insert over capacity evicts the oldest entry.
    pub fn insert(&self, key: &str, value: Decoded) {
        if self.capacity == Capacity::Bounded(0) {
            return;
        }
        let mut inner = self.inner.lock().expect("read cache lock poisoned");

        if inner.map.insert(key.to_string(), value).is_some() {
            return;
        }
        inner.order.push_back(key.to_string());

        if let Capacity::Bounded(max) = self.capacity {
            if inner.map.len() > max {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.map.remove(&oldest);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %oldest, "read cache eviction");
                }
            }
        }
    }

    /// Drop a single entry.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().expect("read cache lock poisoned");
        if inner.map.remove(key).is_some() {
            inner.order.retain(|k| k != key);
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("read cache lock poisoned");
        inner.map.clear();
        inner.order.clear();
        debug!("read cache cleared");
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("read cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss/eviction counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

// ── write buffer ─────────────────────────────────────────────────────

/// Pending writes awaiting commit, keyed like the backing table.
///
/// A key always maps to its most recent write.  [`drain`](Self::drain)
/// removes and returns the whole pending set as one atomic step, which is
/// what makes the flush/concurrent-`set` interleaving safe: a racing write
/// lands either wholly in the drained batch or wholly in the buffer for the
/// next flush.
#[derive(Default)]
pub struct WriteBuffer {
    inner: Mutex<HashMap<String, (String, String)>>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending write.  Overwrites any earlier write for the key.
    pub fn insert(&self, key: &str, tag: &str, payload: String) {
        let mut inner = self.inner.lock().expect("write buffer lock poisoned");
        inner.insert(key.to_string(), (tag.to_string(), payload));
    }

    /// Atomically remove and return every pending write.
    pub fn drain(&self) -> Vec<StoredRow> {
        let mut inner = self.inner.lock().expect("write buffer lock poisoned");
        inner
            .drain()
            .map(|(key, (tag, payload))| StoredRow { key, tag, payload })
            .collect()
    }

    /// Put drained rows back after a failed commit.
    ///
    /// A row is only restored if no newer write for its key arrived in the
    /// meantime, preserving last-write-wins.
    pub fn restore(&self, rows: Vec<StoredRow>) {
        let mut inner = self.inner.lock().expect("write buffer lock poisoned");
        for row in rows {
            inner.entry(row.key).or_insert((row.tag, row.payload));
        }
    }

    /// Number of pending writes.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("write buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn val(n: u32) -> Decoded {
        Arc::new(n)
    }

    fn as_u32(d: &Decoded) -> u32 {
        *d.downcast_ref::<u32>().unwrap()
    }

    #[test]
    fn bounded_insert_evicts_exactly_one_oldest() {
        let cache = ReadCache::new(Capacity::Bounded(2));
        cache.insert("a", val(1));
        cache.insert("b", val(2));
        cache.insert("c", val(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(as_u32(&cache.get("b").unwrap()), 2);
        assert_eq!(as_u32(&cache.get("c").unwrap()), 3);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = ReadCache::new(Capacity::Bounded(3));
        for i in 0..50u32 {
            cache.insert(&format!("k{i}"), val(i));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.stats().evictions(), 47);
    }

    #[test]
    fn replacement_keeps_slot_and_never_evicts() {
        let cache = ReadCache::new(Capacity::Bounded(2));
        cache.insert("a", val(1));
        cache.insert("b", val(2));
        cache.insert("a", val(10));

        assert_eq!(cache.len(), 2);
        assert_eq!(as_u32(&cache.get("a").unwrap()), 10);
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[test]
    fn unbounded_never_evicts() {
        let cache = ReadCache::new(Capacity::Unbounded);
        for i in 0..1000u32 {
            cache.insert(&format!("k{i}"), val(i));
        }
        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let cache = ReadCache::new(Capacity::Bounded(0));
        cache.insert("a", val(1));
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn capacity_from_raw() {
        assert_eq!(Capacity::from_raw(-1), Capacity::Unbounded);
        assert_eq!(Capacity::from_raw(0), Capacity::Bounded(0));
        assert_eq!(Capacity::from_raw(64), Capacity::Bounded(64));
    }

    #[test]
    fn write_buffer_last_write_wins() {
        let buffer = WriteBuffer::new();
        buffer.insert("k", "tag", "one".into());
        buffer.insert("k", "tag", "two".into());

        let rows = buffer.drain();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, "two");
        assert!(buffer.is_empty());
    }

    #[test]
    fn restore_does_not_clobber_newer_write() {
        let buffer = WriteBuffer::new();
        buffer.insert("k", "tag", "old".into());
        let drained = buffer.drain();

        // A newer write arrives while the flush is failing.
        buffer.insert("k", "tag", "new".into());
        buffer.restore(drained);

        let rows = buffer.drain();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, "new");
    }

    #[test]
    fn restore_preserves_unflushed_rows_for_retry() {
        let buffer = WriteBuffer::new();
        buffer.insert("a", "tag", "1".into());
        buffer.insert("b", "tag", "2".into());

        let drained = buffer.drain();
        assert!(buffer.is_empty());

        buffer.restore(drained);
        assert_eq!(buffer.len(), 2);
    }
}
