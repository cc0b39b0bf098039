//! Scheduler error types.
//!
//! All scheduler subsystems surface errors through [`SchedError`], the single
//! error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

use uuid::Uuid;

/// Unified error type for the hostkit scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// The sequence has been destroyed and cannot be restarted.
    #[error("sequence destroyed: {id}")]
    SequenceDestroyed {
        /// The [`Uuid`] of the destroyed sequence.
        id: Uuid,
    },

    /// The referenced sequence is not registered with the scheduler.
    #[error("sequence not found: {id}")]
    SequenceNotFound { id: Uuid },
}

/// Convenience alias used throughout the scheduler crate.
pub type Result<T> = std::result::Result<T, SchedError>;
