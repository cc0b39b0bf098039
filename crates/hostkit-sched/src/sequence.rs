//! Restartable action sequences.
//!
//! An [`ActionSequence`] owns an immutable, ordered list of [`Action`]s and
//! compiles it into timeline callbacks when started.  The compile pass walks
//! the list with an index cursor and a cumulative tick offset:
//!
//! ```text
//! Idle --start--> Running --stop--> Stopped --start--> Running ...
//!                     \--destroy--> Destroyed (terminal)
//! ```
//!
//! Conditional repeats cannot be unrolled (their duration is unknown), so
//! compilation pauses at them: the cursor is saved as a resumption pointer
//! and a periodic callback re-compiles the remainder once the predicate
//! fails.  `stop()` cancels everything and rewinds the cursor to zero, so a
//! later `start()` replays the full list from offset zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::action::{Action, ActionFn, PredicateFn};
use crate::error::{Result, SchedError};
use crate::scheduler::Scheduler;
use crate::tick::{CallbackHandle, TickContext, TickFn};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Lifecycle state of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequencePhase {
    /// Built but never started.
    Idle,
    /// Compiled callbacks are live on the timeline.
    Running,
    /// All callbacks cancelled; a later `start` replays from the beginning.
    Stopped,
    /// Permanently aborted.  Cannot be restarted.
    Destroyed,
}

/// Metadata snapshot of a sequence visible to external callers.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceInfo {
    pub id: Uuid,
    pub phase: SequencePhase,
    /// Number of actions in the (immutable) action list.
    pub actions: usize,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Chained builder producing the immutable action list of a sequence.
///
/// Obtained from [`Scheduler::sequence`]; [`build`](Self::build) registers
/// the sequence with the scheduler's running set.
pub struct SequenceBuilder {
    scheduler: Scheduler,
    actions: Vec<Action>,
}

impl SequenceBuilder {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            actions: Vec::new(),
        }
    }

    /// Append a task that runs at the current time offset.
    pub fn task(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.actions.push(Action::Task(Arc::new(f)));
        self
    }

    /// Append a delay of `ticks` before the next action.
    pub fn delay(mut self, ticks: u64) -> Self {
        self.actions.push(Action::Delay(ticks));
        self
    }

    /// Append a bounded repeat: `times` executions of `f`, `every` ticks apart.
    pub fn repeat(mut self, times: u32, every: u64, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.actions.push(Action::Repeat {
            times,
            every,
            task: Arc::new(f),
        });
        self
    }

    /// Append a conditional repeat that runs while `predicate` holds.
    pub fn repeat_while(
        mut self,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
        every: u64,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.actions.push(Action::RepeatWhile {
            predicate: Arc::new(predicate),
            every,
            task: Arc::new(f),
        });
        self
    }

    /// Append a conditional repeat that runs until `predicate` holds.
    /// Sugar for [`repeat_while`](Self::repeat_while) with a negated predicate.
    pub fn repeat_until(
        self,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
        every: u64,
        f: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.repeat_while(move || !predicate(), every, f)
    }

    /// Append an infinite repeat.  Anything appended after it is discarded
    /// when the sequence compiles.
    pub fn repeat_forever(mut self, every: u64, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.actions.push(Action::RepeatForever {
            every,
            task: Arc::new(f),
        });
        self
    }

    /// Finish building: register the sequence with the scheduler and return it.
    pub fn build(self) -> ActionSequence {
        let seq = ActionSequence {
            inner: Arc::new(SequenceInner {
                id: Uuid::now_v7(),
                created_at: Utc::now(),
                actions: self.actions,
                scheduler: self.scheduler.clone(),
                aborted: AtomicBool::new(false),
                state: Mutex::new(SeqState {
                    phase: SequencePhase::Idle,
                    cursor: 0,
                    offset: 0,
                    waiting: false,
                    handles: Vec::new(),
                }),
            }),
        };
        self.scheduler.register(&seq);
        debug!(sequence_id = %seq.id(), actions = seq.inner.actions.len(), "sequence built");
        seq
    }
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

struct SeqState {
    phase: SequencePhase,
    /// Resumption pointer into the action list.
    cursor: usize,
    /// Cumulative tick offset of the current compile pass.
    offset: u64,
    /// True while a conditional repeat owns the remainder of the list.
    /// While set, only the conditional's own resumption may compile further.
    waiting: bool,
    /// Handles of every live compiled callback.
    handles: Vec<CallbackHandle>,
}

struct SequenceInner {
    id: Uuid,
    created_at: DateTime<Utc>,
    actions: Vec<Action>,
    scheduler: Scheduler,
    /// Permanent abort flag.  Checked by every compiled callback before any
    /// user code runs, so nothing executes after `destroy()` even for
    /// callbacks already drained into the current tick.
    aborted: AtomicBool,
    state: Mutex<SeqState>,
}

/// A restartable, destroyable sequence of scheduled actions.
///
/// Cheaply cloneable (`Arc`-backed); all clones share one state machine.
#[derive(Clone)]
pub struct ActionSequence {
    inner: Arc<SequenceInner>,
}

impl ActionSequence {
    /// Unique id of this sequence.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SequencePhase {
        self.inner.state.lock().expect("sequence lock poisoned").phase
    }

    /// Metadata snapshot.
    pub fn info(&self) -> SequenceInfo {
        SequenceInfo {
            id: self.inner.id,
            phase: self.phase(),
            actions: self.inner.actions.len(),
            created_at: self.inner.created_at,
        }
    }

    /// Start (or restart) the sequence.
    ///
    /// A no-op when the scheduler's enablement check fails.  With
    /// `restart = true` any live callbacks are cancelled first and the
    /// sequence replays from the beginning at offset zero; with
    /// `restart = false` compilation continues from the current cursor.
    pub fn start(&self, restart: bool) -> Result<()> {
        if self.inner.aborted.load(Ordering::Acquire) {
            return Err(SchedError::SequenceDestroyed { id: self.inner.id });
        }
        if !self.inner.scheduler.is_enabled() {
            debug!(sequence_id = %self.inner.id, "scheduler disabled, start is a no-op");
            return Ok(());
        }

        let mut st = self.inner.state.lock().expect("sequence lock poisoned");
        if restart {
            Self::halt_locked(&mut st);
        } else if st.waiting {
            // A pending conditional repeat already owns the remainder;
            // compiling from the cursor now would replay the tail a second
            // time when the predicate resolves.
            debug!(sequence_id = %self.inner.id, "conditional repeat pending, start is a no-op");
            return Ok(());
        }
        st.phase = SequencePhase::Running;
        debug!(sequence_id = %self.inner.id, cursor = st.cursor, "sequence starting");
        self.compile(&mut st);
        Ok(())
    }

    /// Cancel every live callback and rewind to the beginning.
    ///
    /// The permanent action list is untouched; a subsequent `start` produces
    /// the same callback timeline as the first one did.
    pub fn stop(&self) {
        let mut st = self.inner.state.lock().expect("sequence lock poisoned");
        Self::halt_locked(&mut st);
        if st.phase != SequencePhase::Destroyed {
            st.phase = SequencePhase::Stopped;
        }
        debug!(sequence_id = %self.inner.id, "sequence stopped");
    }

    /// Permanently abort the sequence and remove it from the scheduler's
    /// running set.  In-flight and future callbacks become no-ops, including
    /// those already drained into the current tick.  Terminal.
    pub fn destroy(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        {
            let mut st = self.inner.state.lock().expect("sequence lock poisoned");
            Self::halt_locked(&mut st);
            st.phase = SequencePhase::Destroyed;
        }
        self.inner.scheduler.unregister(self.inner.id);
        debug!(sequence_id = %self.inner.id, "sequence destroyed");
    }

    // -- Compilation ----------------------------------------------------

    fn halt_locked(st: &mut SeqState) {
        for handle in st.handles.drain(..) {
            handle.cancel();
        }
        st.cursor = 0;
        st.offset = 0;
        st.waiting = false;
    }

    /// Wrap a user task so the abort flag gates every execution.
    fn guarded(&self, task: ActionFn) -> TickFn {
        let seq = self.inner.clone();
        Arc::new(move |_ctx: &TickContext| {
            if seq.aborted.load(Ordering::Acquire) {
                return;
            }
            task();
        })
    }

    /// Compile the action list from the current cursor into timeline
    /// callbacks.  Pauses at conditional repeats and ends at infinite ones.
    fn compile(&self, st: &mut SeqState) {
        let driver = self.inner.scheduler.driver().clone();

        while st.cursor < self.inner.actions.len() {
            let idx = st.cursor;
            st.cursor += 1;
            let action = &self.inner.actions[idx];
            trace!(sequence_id = %self.inner.id, index = idx, kind = action.kind(), offset = st.offset, "compiling action");

            match action {
                Action::Task(task) => {
                    let handle = driver.schedule_once(st.offset, self.guarded(task.clone()));
                    st.handles.push(handle);
                }

                Action::Delay(ticks) => {
                    st.offset += ticks;
                }

                Action::Repeat { times, every, task } => {
                    for _ in 0..*times {
                        let handle = driver.schedule_once(st.offset, self.guarded(task.clone()));
                        st.handles.push(handle);
                        st.offset += every;
                    }
                }

                Action::RepeatWhile {
                    predicate,
                    every,
                    task,
                } => {
                    // Duration unknown: compile a single periodic callback and
                    // save the cursor as the resumption pointer.  Nothing
                    // after this action compiles until the predicate fails.
                    let resume_at = st.cursor;
                    st.waiting = true;
                    let handle = driver.schedule_repeating(
                        st.offset,
                        *every,
                        self.while_callback(predicate.clone(), task.clone(), resume_at),
                    );
                    st.handles.push(handle);
                    return;
                }

                Action::RepeatForever { every, task } => {
                    // Nothing may follow an infinite repeat.
                    let handle =
                        driver.schedule_repeating(st.offset, *every, self.guarded(task.clone()));
                    st.handles.push(handle);
                    st.cursor = self.inner.actions.len();
                    return;
                }
            }
        }
    }

    fn while_callback(&self, predicate: PredicateFn, task: ActionFn, resume_at: usize) -> TickFn {
        let seq = self.clone();
        Arc::new(move |ctx: &TickContext| {
            if seq.inner.aborted.load(Ordering::Acquire) {
                return;
            }
            if predicate() {
                task();
            } else {
                // Predicate resolved: cancel this periodic entry and resume
                // the remainder of the list immediately at offset zero.
                ctx.cancel();
                seq.resume_from(resume_at);
            }
        })
    }

    /// Continue compilation from `cursor` at offset zero.  Called from the
    /// terminating firing of a conditional repeat.
    fn resume_from(&self, cursor: usize) {
        if self.inner.aborted.load(Ordering::Acquire) {
            return;
        }
        let mut st = self.inner.state.lock().expect("sequence lock poisoned");
        if st.phase != SequencePhase::Running {
            return;
        }
        st.cursor = cursor;
        st.offset = 0;
        st.waiting = false;
        trace!(sequence_id = %self.inner.id, cursor, "resuming after conditional repeat");
        self.compile(&mut st);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::TickDriver;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;

    fn fixture() -> (TickDriver, Scheduler, Arc<StdMutex<Vec<(char, u64)>>>) {
        let driver = TickDriver::new();
        let scheduler = Scheduler::new(driver.clone());
        (driver, scheduler, Arc::new(StdMutex::new(Vec::new())))
    }

    fn mark(
        fired: &Arc<StdMutex<Vec<(char, u64)>>>,
        driver: &TickDriver,
        label: char,
    ) -> impl Fn() + Send + Sync + 'static {
        let fired = fired.clone();
        let driver = driver.clone();
        move || fired.lock().unwrap().push((label, driver.now()))
    }

    #[test]
    fn task_delay_task_timeline() {
        let (driver, scheduler, fired) = fixture();

        let seq = scheduler
            .sequence()
            .task(mark(&fired, &driver, 'a'))
            .delay(5)
            .task(mark(&fired, &driver, 'b'))
            .build();
        seq.start(true).unwrap();

        driver.advance(6);
        assert_eq!(*fired.lock().unwrap(), vec![('a', 0), ('b', 5)]);
    }

    #[test]
    fn repeat_unrolls_task_delay_pairs() {
        let (driver, scheduler, fired) = fixture();

        let seq = scheduler
            .sequence()
            .repeat(3, 2, mark(&fired, &driver, 'r'))
            .task(mark(&fired, &driver, 'z'))
            .build();
        seq.start(true).unwrap();

        driver.advance(7);
        assert_eq!(
            *fired.lock().unwrap(),
            vec![('r', 0), ('r', 2), ('r', 4), ('z', 6)]
        );
    }

    #[test]
    fn stop_then_start_replays_from_offset_zero() {
        let (driver, scheduler, fired) = fixture();

        let seq = scheduler
            .sequence()
            .task(mark(&fired, &driver, 'a'))
            .delay(3)
            .task(mark(&fired, &driver, 'b'))
            .build();

        seq.start(true).unwrap();
        driver.advance(1); // 'a' at tick 0
        seq.stop();
        assert_eq!(seq.phase(), SequencePhase::Stopped);
        driver.advance(5); // 'b' was cancelled, nothing fires

        seq.start(true).unwrap();
        driver.advance(4);

        let fired = fired.lock().unwrap();
        assert_eq!(*fired, vec![('a', 0), ('a', 6), ('b', 9)]);
    }

    #[test]
    fn repeat_while_runs_then_resumes_remainder() {
        let (driver, scheduler, fired) = fixture();
        let remaining = Arc::new(AtomicU32::new(2));

        let r = remaining.clone();
        let pred = move || r.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let seq = scheduler
            .sequence()
            .repeat_while(pred, 2, mark(&fired, &driver, 't'))
            .task(mark(&fired, &driver, 'z'))
            .build();
        seq.start(true).unwrap();

        // Predicate true at ticks 0 and 2, false at tick 4: the remainder
        // resumes immediately, so 'z' also fires at tick 4.
        driver.advance(5);
        assert_eq!(
            *fired.lock().unwrap(),
            vec![('t', 0), ('t', 2), ('z', 4)]
        );
    }

    #[test]
    fn start_without_restart_is_inert_while_conditional_pending() {
        let (driver, scheduler, fired) = fixture();
        let remaining = Arc::new(AtomicU32::new(2));

        let r = remaining.clone();
        let pred = move || r.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let seq = scheduler
            .sequence()
            .repeat_while(pred, 2, mark(&fired, &driver, 'w'))
            .task(mark(&fired, &driver, 'z'))
            .build();
        seq.start(true).unwrap();
        driver.advance(1); // 'w' fired at 0, predicate still pending

        // The conditional repeat owns the tail: this must not compile it.
        seq.start(false).unwrap();
        driver.advance(5);

        assert_eq!(
            *fired.lock().unwrap(),
            vec![('w', 0), ('w', 2), ('z', 4)]
        );
    }

    #[test]
    fn repeat_until_negates_predicate() {
        let (driver, scheduler, fired) = fixture();
        let done = Arc::new(AtomicBool::new(false));

        let d = done.clone();
        let seq = scheduler
            .sequence()
            .repeat_until(move || d.load(Ordering::SeqCst), 1, mark(&fired, &driver, 'u'))
            .task(mark(&fired, &driver, 'z'))
            .build();
        seq.start(true).unwrap();

        driver.advance(3); // fires at 0, 1, 2
        done.store(true, Ordering::SeqCst);
        driver.advance(2); // tick 3: predicate resolved, 'z' fires same tick

        assert_eq!(
            *fired.lock().unwrap(),
            vec![('u', 0), ('u', 1), ('u', 2), ('z', 3)]
        );
    }

    #[test]
    fn repeat_forever_discards_remainder() {
        let (driver, scheduler, fired) = fixture();

        let seq = scheduler
            .sequence()
            .repeat_forever(2, mark(&fired, &driver, 'f'))
            .task(mark(&fired, &driver, 'x')) // unreachable
            .build();
        seq.start(true).unwrap();

        driver.advance(5);
        assert_eq!(*fired.lock().unwrap(), vec![('f', 0), ('f', 2), ('f', 4)]);
    }

    #[test]
    fn destroy_prevents_all_callbacks() {
        let (driver, scheduler, fired) = fixture();

        let seq = scheduler
            .sequence()
            .task(mark(&fired, &driver, 'a'))
            .repeat_forever(1, mark(&fired, &driver, 'f'))
            .build();
        seq.start(true).unwrap();
        seq.destroy();

        driver.advance(5);
        assert!(fired.lock().unwrap().is_empty());
        assert_eq!(seq.phase(), SequencePhase::Destroyed);
    }

    #[test]
    fn destroyed_sequence_cannot_restart() {
        let (_driver, scheduler, _fired) = fixture();
        let seq = scheduler.sequence().delay(1).build();
        seq.destroy();

        let result = seq.start(true);
        assert!(matches!(
            result,
            Err(SchedError::SequenceDestroyed { .. })
        ));
    }

    #[test]
    fn disabled_scheduler_makes_start_a_noop() {
        let driver = TickDriver::new();
        let scheduler = Scheduler::with_enablement(driver.clone(), || false);
        let fired = Arc::new(StdMutex::new(Vec::new()));

        let seq = scheduler
            .sequence()
            .task(mark(&fired, &driver, 'a'))
            .build();
        seq.start(true).unwrap();

        driver.advance(3);
        assert!(fired.lock().unwrap().is_empty());
        assert_eq!(seq.phase(), SequencePhase::Idle);
    }

    #[test]
    fn info_snapshot() {
        let (_driver, scheduler, _fired) = fixture();
        let seq = scheduler.sequence().delay(1).delay(2).build();

        let info = seq.info();
        assert_eq!(info.actions, 2);
        assert_eq!(info.phase, SequencePhase::Idle);
    }
}
