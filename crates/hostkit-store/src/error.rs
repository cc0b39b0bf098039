//! Error types for the hostkit-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Uses `thiserror` for ergonomic, zero-cost error definitions.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend connection or statement failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A value failed to serialize on write.
    #[error("encode failed for tag `{tag}`: {reason}")]
    Encode { tag: String, reason: String },

    /// A stored payload or type tag failed to resolve on read.  Never
    /// silently coerced; a failed decode is a failed `get`.
    #[error("decode failed for tag `{tag}`: {reason}")]
    Decode { tag: String, reason: String },

    /// No decoder is registered for the stored type tag.
    #[error("unknown type tag: {tag}")]
    UnknownTag { tag: String },

    /// The caller-supplied table name cannot be made into an identifier.
    #[error("invalid table name `{name}`: {reason}")]
    InvalidTableName { name: String, reason: &'static str },

    /// Store construction was misconfigured.  Fatal: no half-initialized
    /// store is ever returned.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The store has been closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
