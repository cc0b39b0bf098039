//! Store connection: cache-mode selection, lazy tables, periodic flush.
//!
//! A [`Store`] owns one SQLite connection, one [`CommitCoordinator`], and
//! zero-or-one periodic-flush [`ActionSequence`].  Tables are created
//! lazily on first access and live until the store closes.  Closing flushes
//! every write-buffered table synchronously before the connection goes
//! away, so no buffered write is lost on clean shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use hostkit_sched::{ActionSequence, Scheduler};

use crate::cache::Capacity;
use crate::codec::{Codec, Persist};
use crate::coordinator::CommitCoordinator;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::registry::StoreRegistry;
use crate::table::Table;

// ── cache mode ───────────────────────────────────────────────────────

/// Per-store caching behavior, selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheMode {
    /// No caching: every read and write goes to the backend.
    None,
    /// Bounded read cache only; writes go to the backend immediately.
    Get,
    /// Read cache plus write buffer, flushed by a scheduled periodic effect.
    WritePeriodic,
    /// Read cache plus write buffer, flushed only on explicit `flush` or
    /// `close`.  A crash before either loses the buffered writes; that is
    /// the documented trade-off of this mode.
    Full,
}

impl CacheMode {
    /// Whether reads are served from a per-table cache.
    pub fn reads_cached(self) -> bool {
        self != CacheMode::None
    }

    /// Whether writes land in a write-back buffer instead of the backend.
    pub fn writes_buffered(self) -> bool {
        matches!(self, CacheMode::WritePeriodic | CacheMode::Full)
    }
}

// ── configuration ────────────────────────────────────────────────────

/// Predicate consulted before each periodic flush pass.
pub type FlushPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Store construction parameters.
#[derive(Clone)]
pub struct StoreConfig {
    database: String,
    path: Option<PathBuf>,
    in_memory: bool,
    mode: CacheMode,
    capacity: i64,
    flush_every: Option<u64>,
    flush_if: Option<FlushPredicate>,
}

impl StoreConfig {
    /// Defaults: `Get` mode, read-cache capacity 128, file-backed at
    /// `<database>.db`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            path: None,
            in_memory: false,
            mode: CacheMode::Get,
            capacity: 128,
            flush_every: None,
            flush_if: None,
        }
    }

    /// Back the store with a file at `path` instead of `<database>.db`.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Back the store with an in-memory database (tests).
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Select the caching mode.
    pub fn mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Read-cache capacity per table.  Negative means unbounded.
    pub fn capacity(mut self, raw: i64) -> Self {
        self.capacity = raw;
        self
    }

    /// Flush interval in ticks.  Required iff mode is
    /// [`CacheMode::WritePeriodic`].
    pub fn flush_every(mut self, ticks: u64) -> Self {
        self.flush_every = Some(ticks);
        self
    }

    /// Gate the periodic flush on a predicate (default: always flush).
    pub fn flush_if(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.flush_if = Some(Arc::new(predicate));
        self
    }
}

/// Metadata snapshot of a live store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub id: Uuid,
    pub database: String,
    pub mode: CacheMode,
    pub tables: usize,
    pub pending_writes: usize,
    pub opened_at: DateTime<Utc>,
}

// ── store ────────────────────────────────────────────────────────────

pub(crate) struct StoreInner {
    id: Uuid,
    database: String,
    opened_at: DateTime<Utc>,
    mode: CacheMode,
    capacity: Capacity,
    db: Database,
    codec: Codec,
    coordinator: CommitCoordinator,
    tables: DashMap<String, Arc<Table>>,
    flush_seq: Mutex<Option<ActionSequence>>,
    closed: AtomicBool,
    registry: Mutex<Option<StoreRegistry>>,
}

/// Connection to one logical database with tiered caching.
///
/// Cheaply cloneable (`Arc`-backed); all clones share the same tables,
/// buffers, and lifecycle.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open a store.
    ///
    /// Misconfiguration fails here, before any connection is made:
    /// [`CacheMode::WritePeriodic`] requires both a flush interval and a
    /// scheduler to run the periodic effect on.
    pub fn open(config: StoreConfig, scheduler: Option<&Scheduler>) -> StoreResult<Self> {
        // Validate up front; never hand out a half-initialized store.
        let periodic = if config.mode == CacheMode::WritePeriodic {
            let every = config.flush_every.ok_or_else(|| {
                StoreError::Configuration(
                    "cache mode WritePeriodic requires a flush interval".to_string(),
                )
            })?;
            let scheduler = scheduler.ok_or_else(|| {
                StoreError::Configuration(
                    "cache mode WritePeriodic requires a scheduler".to_string(),
                )
            })?;
            Some((every, scheduler.clone()))
        } else {
            None
        };

        let db = if config.in_memory {
            Database::open_in_memory()?
        } else {
            let path = config
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{}.db", config.database)));
            Database::open(path)?
        };

        let store = Self {
            inner: Arc::new(StoreInner {
                id: Uuid::now_v7(),
                database: config.database.clone(),
                opened_at: Utc::now(),
                mode: config.mode,
                capacity: Capacity::from_raw(config.capacity),
                coordinator: CommitCoordinator::new(db.clone()),
                db,
                codec: Codec::new(),
                tables: DashMap::new(),
                flush_seq: Mutex::new(None),
                closed: AtomicBool::new(false),
                registry: Mutex::new(None),
            }),
        };

        if let Some((every, scheduler)) = periodic {
            let predicate = config.flush_if.unwrap_or_else(|| Arc::new(|| true));
            let weak = Arc::downgrade(&store.inner);
            // Leading delay so the first flush lands one full interval
            // after open, not on the very next tick.
            let seq = scheduler
                .sequence()
                .delay(every)
                .repeat_forever(every, move || periodic_flush(&weak, &predicate))
                .build();
            seq.start(true)
                .map_err(|e| StoreError::Configuration(e.to_string()))?;
            *store.inner.flush_seq.lock().expect("flush seq lock poisoned") = Some(seq);
        }

        info!(
            store_id = %store.inner.id,
            database = %store.inner.database,
            mode = ?store.inner.mode,
            "store opened"
        );
        Ok(store)
    }

    /// Unique id of this store connection.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Logical database name.
    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// The caching mode this store was opened with.
    pub fn mode(&self) -> CacheMode {
        self.inner.mode
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Metadata snapshot.
    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            id: self.inner.id,
            database: self.inner.database.clone(),
            mode: self.inner.mode,
            tables: self.inner.tables.len(),
            pending_writes: self
                .inner
                .tables
                .iter()
                .map(|e| e.value().pending_writes())
                .sum(),
            opened_at: self.inner.opened_at,
        }
    }

    /// Pre-register a type's decoder for cold reads.
    pub fn register_type<T: Persist>(&self) {
        self.inner.codec.register::<T>();
    }

    /// Get (lazily creating) a table handle.  Idempotent; the handle is
    /// shared with every other caller of the same name.
    pub async fn table(&self, name: &str) -> StoreResult<Arc<Table>> {
        self.ensure_open()?;
        if let Some(existing) = self.inner.tables.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let physical = self.inner.db.create_table(name).await?;
        let table = self
            .inner
            .tables
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(store_id = %self.inner.id, table = %name, "table opened");
                Arc::new(Table::new(
                    name.to_string(),
                    physical,
                    self.inner.db.clone(),
                    self.inner.codec.clone(),
                    self.inner.mode,
                    self.inner.capacity,
                ))
            })
            .clone();
        Ok(table)
    }

    /// Convenience: write through the named table.
    pub async fn set<T: Persist>(&self, table: &str, key: &str, value: &T) -> StoreResult<()> {
        self.table(table).await?.set(key, value).await
    }

    /// Convenience: read through the named table.
    pub async fn get<T: Persist>(&self, table: &str, key: &str) -> StoreResult<Option<T>> {
        self.table(table).await?.get(key).await
    }

    /// Synchronously flush one table's write buffer.  A table that was
    /// never opened has nothing to flush.
    pub async fn flush(&self, table: &str) -> StoreResult<usize> {
        self.ensure_open()?;
        match self.inner.tables.get(table) {
            Some(entry) => {
                let table = Arc::clone(entry.value());
                drop(entry);
                self.inner.coordinator.flush(&table).await
            }
            None => Ok(0),
        }
    }

    /// Synchronously flush every table.  All tables are attempted even if
    /// one fails; the first error is returned after the pass.
    pub async fn flush_all(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        self.flush_all_inner().await
    }

    /// Collect background-flush errors recorded since the last call, per
    /// table.
    pub fn take_flush_errors(&self) -> Vec<(String, StoreError)> {
        self.inner
            .tables
            .iter()
            .filter_map(|e| {
                e.value()
                    .take_flush_error()
                    .map(|err| (e.key().clone(), err))
            })
            .collect()
    }

    /// Close the store: stop the periodic flush, perform a final
    /// synchronous flush of every table, and unregister.  Idempotent.
    pub async fn close(&self) -> StoreResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(store_id = %self.inner.id, database = %self.inner.database, "closing store");

        if let Some(seq) = self
            .inner
            .flush_seq
            .lock()
            .expect("flush seq lock poisoned")
            .take()
        {
            seq.destroy();
        }

        let result = self.flush_all_inner().await;

        let registry = self
            .inner
            .registry
            .lock()
            .expect("registry slot poisoned")
            .take();
        if let Some(registry) = registry {
            registry.detach(self.inner.id);
        }

        result.map(|_| ())
    }

    pub(crate) fn attach_registry(&self, registry: StoreRegistry) {
        *self
            .inner
            .registry
            .lock()
            .expect("registry slot poisoned") = Some(registry);
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn flush_all_inner(&self) -> StoreResult<usize> {
        let tables: Vec<Arc<Table>> = self
            .inner
            .tables
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut total = 0;
        let mut first_error = None;
        for table in tables {
            match self.inner.coordinator.flush(&table).await {
                Ok(n) => total += n,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(total),
        }
    }
}

/// Body of the periodic-flush callback: skip when the owning store is gone
/// or closed or the predicate says not now, otherwise spawn one background
/// flush per table with pending writes.
fn periodic_flush(store: &Weak<StoreInner>, predicate: &FlushPredicate) {
    let Some(inner) = store.upgrade() else {
        return;
    };
    if inner.closed.load(Ordering::Acquire) || !predicate() {
        return;
    }
    for entry in inner.tables.iter() {
        let table = Arc::clone(entry.value());
        if table.pending_writes() > 0 {
            inner.coordinator.spawn_flush(table);
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
