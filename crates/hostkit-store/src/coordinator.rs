//! Write-back commit coordinator.
//!
//! Drains a table's write buffer into one [`commit_batch`] transaction.
//! The drain is atomic with respect to concurrent `set` calls, and a failed
//! commit restores the drained rows (without clobbering newer writes), so
//! delivery to the backend is at-least-once — harmless, because every row
//! is an idempotent upsert.
//!
//! [`commit_batch`]: crate::db::Database::commit_batch

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::db::Database;
use crate::error::StoreResult;
use crate::table::Table;

/// Flushes write buffers into the backing database.
///
/// Cheaply cloneable; one coordinator serves every table of its store.
#[derive(Clone)]
pub struct CommitCoordinator {
    db: Database,
}

impl CommitCoordinator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Synchronously flush a table's write buffer.
    ///
    /// Returns the number of rows committed.  Waits its turn if a
    /// background flush is currently running.  On failure the rows return
    /// to the buffer and the error propagates, so the next attempt retries
    /// the same writes.
    pub async fn flush(&self, table: &Table) -> StoreResult<usize> {
        let _gate = table.flush_gate().lock().await;
        self.flush_gated(table).await
    }

    /// Schedule a background flush and return immediately.
    ///
    /// At most one flush per table is in flight: if one is already running
    /// this call does nothing, and the pending writes simply ride along
    /// with the flush that is in progress or the next one.  Failures are
    /// logged and stashed on the table for the owner to observe; the buffer
    /// keeps the rows for retry.
    pub fn spawn_flush(&self, table: Arc<Table>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let Ok(_gate) = table.flush_gate().try_lock() else {
                trace!(table = %table.name(), "flush already in flight, skipping");
                return;
            };
            if let Err(err) = coordinator.flush_gated(&table).await {
                error!(table = %table.name(), error = %err, "background flush failed");
                table.record_flush_error(err);
            }
        });
    }

    /// The flush body.  Caller must hold the table's flush gate.
    async fn flush_gated(&self, table: &Table) -> StoreResult<usize> {
        let Some(buffer) = table.write_buffer() else {
            return Ok(0);
        };

        let rows = buffer.drain();
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();

        match self
            .db
            .commit_batch(table.physical().to_string(), rows.clone())
            .await
        {
            Ok(()) => {
                debug!(table = %table.name(), rows = count, "write buffer flushed");
                Ok(count)
            }
            Err(err) => {
                buffer.restore(rows);
                Err(err)
            }
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
