//! Tiered per-table cache front.
//!
//! A [`Table`] owns the read cache and write buffer for one backing SQLite
//! table and is the only mutation path for either.  Writes update the read
//! cache synchronously before anything else happens, so a `get` issued
//! immediately after a `set` observes the new value regardless of cache
//! mode or flush timing.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::cache::{Capacity, CacheStats, ReadCache, WriteBuffer};
use crate::codec::{Codec, Decoded, Persist};
use crate::db::{Database, StoredRow};
use crate::error::{StoreError, StoreResult};
use crate::store::CacheMode;

/// Handle to one cached table.  Shared by all callers of the owning store.
pub struct Table {
    name: String,
    physical: String,
    db: Database,
    codec: Codec,
    read_cache: Option<ReadCache>,
    write_buffer: Option<WriteBuffer>,
    /// Serializes flushes for this table; `try_lock` on the async path
    /// keeps at most one flush in flight.
    flush_gate: tokio::sync::Mutex<()>,
    /// Last background-flush failure, surfaced on the owner's next
    /// synchronous touch instead of vanishing.
    flush_error: Mutex<Option<StoreError>>,
}

impl Table {
    pub(crate) fn new(
        name: String,
        physical: String,
        db: Database,
        codec: Codec,
        mode: CacheMode,
        capacity: Capacity,
    ) -> Self {
        Self {
            name,
            physical,
            db,
            codec,
            read_cache: mode.reads_cached().then(|| ReadCache::new(capacity)),
            write_buffer: mode.writes_buffered().then(WriteBuffer::new),
            flush_gate: tokio::sync::Mutex::new(()),
            flush_error: Mutex::new(None),
        }
    }

    /// Caller-facing table name (without the sentinel prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write a value.
    ///
    /// The read cache is updated synchronously, so the new value is
    /// observable via [`get`](Self::get) before any persistence happens.
    /// With write-buffering enabled the call returns once the write is
    /// buffered; otherwise it upserts the backing table immediately.
    pub async fn set<T: Persist>(&self, key: &str, value: &T) -> StoreResult<()> {
        let (tag, payload) = self.codec.encode(value)?;

        if let Some(buffer) = &self.write_buffer {
            if let Some(cache) = &self.read_cache {
                cache.insert(key, Arc::new(value.clone()) as Decoded);
            }
            buffer.insert(key, tag, payload);
            debug!(table = %self.name, key = %key, tag = %tag, "write buffered");
            return Ok(());
        }

        self.db
            .upsert(
                self.physical.clone(),
                StoredRow {
                    key: key.to_string(),
                    tag: tag.to_string(),
                    payload,
                },
            )
            .await?;

        // Unbuffered path: cache only once the row is durable.  Every cache
        // entry must mirror a committed row or a buffered write; a failed
        // upsert backs neither.
        if let Some(cache) = &self.read_cache {
            cache.insert(key, Arc::new(value.clone()) as Decoded);
        }
        Ok(())
    }

    /// Read a value.
    ///
    /// Cache hits return without touching the backend.  Misses read the
    /// backing table, decode via the codec, and populate the read cache.
    /// An absent key is `Ok(None)`; a tag or payload that fails to decode
    /// is an error, never a silent `None`.
    pub async fn get<T: Persist>(&self, key: &str) -> StoreResult<Option<T>> {
        // Make the cold-read path resolvable even if this process never
        // wrote a T.
        self.codec.register::<T>();

        if let Some(cache) = &self.read_cache {
            if let Some(hit) = cache.get(key) {
                debug!(table = %self.name, key = %key, "read cache hit");
                return downcast::<T>(&hit, T::TAG).map(Some);
            }
        }

        let Some(row) = self
            .db
            .fetch(self.physical.clone(), key.to_string())
            .await?
        else {
            return Ok(None);
        };

        let decoded = self.codec.decode(&row.tag, &row.payload)?;
        if let Some(cache) = &self.read_cache {
            cache.insert(key, decoded.clone());
        }
        downcast::<T>(&decoded, &row.tag).map(Some)
    }

    /// Number of writes waiting for the next flush.
    pub fn pending_writes(&self) -> usize {
        self.write_buffer.as_ref().map_or(0, WriteBuffer::len)
    }

    /// Number of entries currently in the read cache.
    pub fn cached_reads(&self) -> usize {
        self.read_cache.as_ref().map_or(0, ReadCache::len)
    }

    /// Read-cache counters, if read caching is enabled.
    pub fn read_stats(&self) -> Option<&CacheStats> {
        self.read_cache.as_ref().map(ReadCache::stats)
    }

    /// Take the last background-flush error, if one occurred since the
    /// previous call.
    pub fn take_flush_error(&self) -> Option<StoreError> {
        self.flush_error
            .lock()
            .expect("flush error slot poisoned")
            .take()
    }

    // ── coordinator access ───────────────────────────────────────────

    pub(crate) fn write_buffer(&self) -> Option<&WriteBuffer> {
        self.write_buffer.as_ref()
    }

    pub(crate) fn physical(&self) -> &str {
        &self.physical
    }

    pub(crate) fn flush_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.flush_gate
    }

    pub(crate) fn record_flush_error(&self, err: StoreError) {
        *self.flush_error.lock().expect("flush error slot poisoned") = Some(err);
    }
}

fn downcast<T: Persist>(decoded: &Decoded, tag: &str) -> StoreResult<T> {
    decoded
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| StoreError::Decode {
            tag: tag.to_string(),
            reason: format!("stored value is not a `{}`", T::TAG),
        })
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Home {
        world: String,
        x: i32,
    }

    impl Persist for Home {
        const TAG: &'static str = "home";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Balance(u64);

    impl Persist for Balance {
        const TAG: &'static str = "balance";
    }

    async fn table(mode: CacheMode, capacity: i64) -> Table {
        let db = Database::open_in_memory().unwrap();
        let physical = db.create_table("homes").await.unwrap();
        Table::new(
            "homes".into(),
            physical,
            db,
            Codec::new(),
            mode,
            Capacity::from_raw(capacity),
        )
    }

    fn home(x: i32) -> Home {
        Home {
            world: "overworld".into(),
            x,
        }
    }

    #[tokio::test]
    async fn set_then_get_every_mode() {
        for mode in [
            CacheMode::None,
            CacheMode::Get,
            CacheMode::WritePeriodic,
            CacheMode::Full,
        ] {
            let t = table(mode, 16).await;
            t.set("alice", &home(7)).await.unwrap();
            let got: Option<Home> = t.get("alice").await.unwrap();
            assert_eq!(got, Some(home(7)), "mode {mode:?}");
        }
    }

    #[tokio::test]
    async fn buffered_write_is_visible_before_any_flush() {
        let t = table(CacheMode::Full, 16).await;
        t.set("alice", &home(1)).await.unwrap();

        // Nothing has touched the backend.
        assert_eq!(t.pending_writes(), 1);
        let on_disk = t.db.fetch(t.physical.clone(), "alice".into()).await.unwrap();
        assert!(on_disk.is_none());

        let got: Option<Home> = t.get("alice").await.unwrap();
        assert_eq!(got, Some(home(1)));
    }

    #[tokio::test]
    async fn unbuffered_write_hits_backend_immediately() {
        let t = table(CacheMode::Get, 16).await;
        t.set("alice", &home(2)).await.unwrap();
        assert_eq!(t.pending_writes(), 0);

        let on_disk = t.db.fetch(t.physical.clone(), "alice".into()).await.unwrap();
        assert!(on_disk.is_some());
    }

    #[tokio::test]
    async fn absent_key_is_none_not_error() {
        let t = table(CacheMode::Get, 16).await;
        let got: Option<Home> = t.get("nobody").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn cold_read_populates_read_cache() {
        let t = table(CacheMode::Get, 16).await;
        t.set("alice", &home(3)).await.unwrap();

        // Get-mode set already cached it; clear to force a cold read.
        t.read_cache.as_ref().unwrap().clear();
        assert_eq!(t.cached_reads(), 0);

        let _: Option<Home> = t.get("alice").await.unwrap();
        assert_eq!(t.cached_reads(), 1);

        // Second read is a pure cache hit.
        let hits_before = t.read_stats().unwrap().hits();
        let _: Option<Home> = t.get("alice").await.unwrap();
        assert_eq!(t.read_stats().unwrap().hits(), hits_before + 1);
    }

    #[tokio::test]
    async fn wrong_type_surfaces_as_decode_error() {
        let t = table(CacheMode::None, 0).await;
        t.set("alice", &home(4)).await.unwrap();

        let got: StoreResult<Option<Balance>> = t.get("alice").await;
        assert!(matches!(got, Err(StoreError::UnknownTag { .. }) | Err(StoreError::Decode { .. })));
    }

    #[tokio::test]
    async fn failed_unbuffered_set_does_not_populate_cache() {
        let t = table(CacheMode::Get, 16).await;

        t.db.execute(|conn| {
            conn.execute("ALTER TABLE t_homes RENAME TO t_homes_hidden", [])?;
            Ok(())
        })
        .await
        .unwrap();

        let err = t.set("alice", &home(9)).await;
        assert!(matches!(err, Err(StoreError::Storage(_))));
        assert_eq!(t.cached_reads(), 0);

        // With the backend repaired, the key is absent — the failed write
        // left no trace in the cache.
        t.db.execute(|conn| {
            conn.execute("ALTER TABLE t_homes_hidden RENAME TO t_homes", [])?;
            Ok(())
        })
        .await
        .unwrap();
        let got: Option<Home> = t.get("alice").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn last_write_wins_in_buffer_and_cache() {
        let t = table(CacheMode::Full, 16).await;
        t.set("alice", &home(1)).await.unwrap();
        t.set("alice", &home(2)).await.unwrap();
        t.set("alice", &home(3)).await.unwrap();

        assert_eq!(t.pending_writes(), 1);
        let got: Option<Home> = t.get("alice").await.unwrap();
        assert_eq!(got, Some(home(3)));
    }
}
