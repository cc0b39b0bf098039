//! Hostkit cooperative action scheduler.
//!
//! This crate provides the tick-driven scheduling half of hostkit:
//!
//! - **[`tick`]** -- Discrete-time callback timeline driven by an external
//!   tick source (manual ticks in tests, a tokio loop in production).
//! - **[`action`]** -- Heterogeneous action types: immediate task, delay,
//!   bounded repeat, conditional repeat, infinite repeat.
//! - **[`sequence`]** -- Restartable [`ActionSequence`] state machine that
//!   compiles an action list into scheduled callbacks.
//! - **[`scheduler`]** -- Scheduler front-end with a [`DashMap`]-backed
//!   registry of live sequences and bulk destroy for shutdown.
//! - **[`error`]** -- Scheduler error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.
//!
//! [`DashMap`]: dashmap::DashMap

pub mod action;
pub mod error;
pub mod scheduler;
pub mod sequence;
pub mod tick;

// Re-export the most commonly used types at the crate root for convenience.
pub use action::{Action, ActionFn, PredicateFn};
pub use error::{Result, SchedError};
pub use scheduler::{EnabledFn, Scheduler};
pub use sequence::{ActionSequence, SequenceBuilder, SequenceInfo, SequencePhase};
pub use tick::{CallbackHandle, TickContext, TickDriver, TickFn};
