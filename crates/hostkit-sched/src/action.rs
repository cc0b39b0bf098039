//! Action types compiled into timeline callbacks.
//!
//! An [`Action`] is immutable once constructed.  Sequences own an ordered
//! list of actions built through
//! [`SequenceBuilder`](crate::sequence::SequenceBuilder) and compile them
//! into scheduled callbacks on [`start`](crate::sequence::ActionSequence::start).

use std::fmt;
use std::sync::Arc;

/// One unit of user work.  Runs on the host's tick thread, so it must not
/// block.
pub type ActionFn = Arc<dyn Fn() + Send + Sync>;

/// Condition evaluated on each firing of a conditional repeat.
pub type PredicateFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// A single step in an action sequence.
pub enum Action {
    /// Run a task at the current time offset.
    Task(ActionFn),

    /// Advance the time offset by `ticks` without running anything.
    Delay(u64),

    /// Run `task` a fixed number of times, `every` ticks apart.  Equivalent
    /// to unrolling `times` sequential task/delay pairs.
    Repeat {
        times: u32,
        every: u64,
        task: ActionFn,
    },

    /// Run `task` once per firing while `predicate` holds, `every` ticks
    /// apart.  The firing that observes a false predicate runs no task and
    /// resumes the remainder of the sequence immediately at offset zero.
    RepeatWhile {
        predicate: PredicateFn,
        every: u64,
        task: ActionFn,
    },

    /// Run `task` every `every` ticks until the sequence is destroyed.
    /// Nothing may follow an infinite repeat; later actions are discarded
    /// at compile time.
    RepeatForever { every: u64, task: ActionFn },
}

impl Action {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Task(_) => "task",
            Action::Delay(_) => "delay",
            Action::Repeat { .. } => "repeat",
            Action::RepeatWhile { .. } => "repeat_while",
            Action::RepeatForever { .. } => "repeat_forever",
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Task(_) => write!(f, "Task"),
            Action::Delay(d) => write!(f, "Delay({d})"),
            Action::Repeat { times, every, .. } => {
                write!(f, "Repeat {{ times: {times}, every: {every} }}")
            }
            Action::RepeatWhile { every, .. } => write!(f, "RepeatWhile {{ every: {every} }}"),
            Action::RepeatForever { every, .. } => {
                write!(f, "RepeatForever {{ every: {every} }}")
            }
        }
    }
}
