//! SQLite backend with per-table key/value operations.
//!
//! The [`Database`] struct wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` and exposes async methods that use
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.
//!
//! Every table follows the same three-column schema:
//!
//! ```sql
//! CREATE TABLE t_<name> (key TEXT PRIMARY KEY, type TEXT NOT NULL, value TEXT NOT NULL)
//! ```
//!
//! Caller-supplied table names are validated and prefixed with
//! [`TABLE_SENTINEL`], so a table may legally be named `"2024_stats"` even
//! though SQLite identifiers cannot start with a digit.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Fixed prefix applied to every caller-supplied table name.
pub const TABLE_SENTINEL: &str = "t_";

/// One durable row: `(key, type tag, encoded payload)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub key: String,
    pub tag: String,
    pub payload: String,
}

/// Thread-safe handle to a SQLite database.
///
/// All read/write operations go through [`Database::execute`] /
/// [`Database::execute_mut`], which dispatch onto the blocking thread pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// Blocks briefly on file I/O; call during startup or wrap in
    /// `spawn_blocking` yourself.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database — useful for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute an arbitrary closure against the connection on the blocking pool.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    /// Execute a mutable closure (for transactions) on the blocking pool.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    // ── table operations ─────────────────────────────────────────────

    /// Validate a caller-supplied table name and return the physical
    /// (sentinel-prefixed) identifier.
    pub fn physical_name(name: &str) -> StoreResult<String> {
        if name.is_empty() {
            return Err(StoreError::InvalidTableName {
                name: name.to_string(),
                reason: "name is empty",
            });
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::InvalidTableName {
                name: name.to_string(),
                reason: "only ASCII alphanumerics and `_` are allowed",
            });
        }
        Ok(format!("{TABLE_SENTINEL}{name}"))
    }

    /// Create the backing table if absent.  Idempotent.  Returns the
    /// physical name used in subsequent statements.
    pub async fn create_table(&self, name: &str) -> StoreResult<String> {
        let physical = Self::physical_name(name)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {physical} \
             (key TEXT PRIMARY KEY, type TEXT NOT NULL, value TEXT NOT NULL)"
        );
        self.execute(move |conn| {
            conn.execute(&sql, [])?;
            Ok(())
        })
        .await?;
        debug!(table = %physical, "table ready");
        Ok(physical)
    }

    /// Insert-or-replace a single row as one transaction.
    pub async fn upsert(&self, physical: String, row: StoredRow) -> StoreResult<()> {
        let sql = upsert_sql(&physical);
        self.execute(move |conn| {
            conn.execute(&sql, params![row.key, row.tag, row.payload])?;
            Ok(())
        })
        .await
    }

    /// Point lookup.  An absent key is `Ok(None)`, not an error.
    pub async fn fetch(&self, physical: String, key: String) -> StoreResult<Option<StoredRow>> {
        let sql = format!("SELECT key, type, value FROM {physical} WHERE key = ?1");
        self.execute(move |conn| {
            let row = conn
                .query_row(&sql, params![key], |r| {
                    Ok(StoredRow {
                        key: r.get(0)?,
                        tag: r.get(1)?,
                        payload: r.get(2)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Apply a batch of upserts with one commit boundary.
    ///
    /// Either the whole batch becomes durable or, on failure, the
    /// transaction rolls back and the error surfaces to the caller —
    /// partial application is never observable.
    pub async fn commit_batch(&self, physical: String, rows: Vec<StoredRow>) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sql = upsert_sql(&physical);
        self.execute_mut(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in &rows {
                    stmt.execute(params![row.key, row.tag, row.payload])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL mode: concurrent readers, non-blocking writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL — a power failure can lose the last
        // transaction but cannot corrupt the file.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        // Busy timeout so concurrent writers wait instead of failing immediately.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        Ok(())
    }
}

fn upsert_sql(physical: &str) -> String {
    format!(
        "INSERT INTO {physical} (key, type, value) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET type = excluded.type, value = excluded.value"
    )
}

// ── tests ────────────────────────────────────────────────────────────
