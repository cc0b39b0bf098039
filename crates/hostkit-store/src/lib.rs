//! Hostkit tiered write-back storage.
//!
//! This crate provides the persistence half of hostkit: a per-table
//! key/value store over SQLite with four selectable caching tiers
//! ([`CacheMode`]), a tag-based value codec, and a commit coordinator that
//! drains write buffers into atomic batch transactions.
//!
//! - **[`db`]** -- SQLite backend behind `spawn_blocking`, with the
//!   sentinel-prefixed three-column table schema.
//! - **[`codec`]** -- [`Persist`] trait and tag/decoder registry turning
//!   typed values into `(tag, payload)` rows and back.
//! - **[`cache`]** -- Bounded FIFO read cache and last-write-wins write
//!   buffer with atomic drain/restore.
//! - **[`table`]** -- Per-table cache front; the only read/write path.
//! - **[`coordinator`]** -- Flush machinery: at most one flush per table in
//!   flight, at-least-once delivery on failure.
//! - **[`store`]** -- [`Store`] connection tying the above together, with
//!   lazy tables and an optional scheduled periodic flush.
//! - **[`registry`]** -- Process-wide [`StoreRegistry`] for bulk shutdown.
//! - **[`error`]** -- Storage error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod cache;
pub mod codec;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod registry;
pub mod store;
pub mod table;

// Re-export the most commonly used types at the crate root for convenience.
pub use cache::{Capacity, CacheStats};
pub use codec::{Codec, Decoded, Persist};
pub use coordinator::CommitCoordinator;
pub use db::{Database, StoredRow, TABLE_SENTINEL};
pub use error::{StoreError, StoreResult};
pub use registry::StoreRegistry;
pub use store::{CacheMode, FlushPredicate, Store, StoreConfig, StoreInfo};
pub use table::Table;
