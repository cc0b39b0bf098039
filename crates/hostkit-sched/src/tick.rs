//! Discrete-time tick driver.
//!
//! The [`TickDriver`] keeps a timeline of scheduled callbacks keyed by tick
//! number.  The host advances time by calling [`TickDriver::tick`] (or by
//! spawning [`TickDriver::drive`], which ticks on a fixed wall-clock period).
//! Callbacks scheduled by one driver never run concurrently with each other:
//! each tick drains due entries in time order and runs them on the calling
//! thread, outside the timeline lock.
//!
//! A callback may schedule more work during its own tick.  `tick()` keeps
//! re-draining until no entry is due at the current tick, so work scheduled
//! "immediately" fires before time advances.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Callback signature for timeline entries.
///
/// The [`TickContext`] gives the callback the current tick and a way to
/// cancel its own entry (used by self-terminating periodic callbacks).
pub type TickFn = Arc<dyn Fn(&TickContext) + Send + Sync>;

/// Per-invocation context handed to every timeline callback.
pub struct TickContext {
    tick: u64,
    cancelled: Arc<AtomicBool>,
}

impl TickContext {
    /// The tick at which this callback is firing.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Cancel the timeline entry that produced this invocation.
    ///
    /// For a periodic entry this prevents any further rescheduling.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Handle to a scheduled callback, used to cancel it.
///
/// Cancellation is a flag flip: the entry stays on the timeline until its
/// due tick, at which point the driver skips it without running any code.
#[derive(Clone)]
pub struct CallbackHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl CallbackHandle {
    /// Mark the callback as cancelled.  Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the callback has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Unique id of the underlying timeline entry.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct TimelineEntry {
    id: u64,
    /// `Some(period)` for periodic entries, `None` for one-shots.
    every: Option<u64>,
    cancelled: Arc<AtomicBool>,
    run: TickFn,
}

struct DriverInner {
    now: AtomicU64,
    next_id: AtomicU64,
    timeline: Mutex<BTreeMap<u64, Vec<TimelineEntry>>>,
    halted: AtomicBool,
}

/// Discrete-time callback timeline.
///
/// Cheaply cloneable (`Arc`-backed) and safe to share across threads.
#[derive(Clone)]
pub struct TickDriver {
    inner: Arc<DriverInner>,
}

impl TickDriver {
    /// Create a driver at tick zero with an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DriverInner {
                now: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
                timeline: Mutex::new(BTreeMap::new()),
                halted: AtomicBool::new(false),
            }),
        }
    }

    /// The current tick.  Starts at 0 and advances by one per [`tick`](Self::tick).
    pub fn now(&self) -> u64 {
        self.inner.now.load(Ordering::Acquire)
    }

    /// Schedule a one-shot callback `delay` ticks from now.
    ///
    /// `delay == 0` fires at the current tick if a `tick()` is in progress
    /// or at the next `tick()` otherwise.
    pub fn schedule_once(&self, delay: u64, run: TickFn) -> CallbackHandle {
        self.schedule(delay, None, run)
    }

    /// Schedule a periodic callback: first firing `delay` ticks from now,
    /// then every `every` ticks until cancelled.  A period of 0 is clamped
    /// to 1 so the entry cannot starve the driver.
    pub fn schedule_repeating(&self, delay: u64, every: u64, run: TickFn) -> CallbackHandle {
        self.schedule(delay, Some(every.max(1)), run)
    }

    fn schedule(&self, delay: u64, every: Option<u64>, run: TickFn) -> CallbackHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let at = self.now() + delay;

        trace!(entry_id = id, at, ?every, "callback scheduled");

        let entry = TimelineEntry {
            id,
            every,
            cancelled: Arc::clone(&cancelled),
            run,
        };

        let mut timeline = self.inner.timeline.lock().expect("timeline lock poisoned");
        timeline.entry(at).or_default().push(entry);

        CallbackHandle { id, cancelled }
    }

    /// Advance time by one tick, running every due callback.
    ///
    /// Entries are drained in tick order (insertion order within a tick) and
    /// run without holding the timeline lock, so callbacks may schedule or
    /// cancel freely.  The drain loop repeats until nothing is due at the
    /// current tick, then the clock advances.
    pub fn tick(&self) {
        let now = self.now();

        loop {
            let due = {
                let mut timeline = self.inner.timeline.lock().expect("timeline lock poisoned");
                let due_keys: Vec<u64> = timeline.range(..=now).map(|(k, _)| *k).collect();
                let mut due = Vec::new();
                for key in due_keys {
                    if let Some(entries) = timeline.remove(&key) {
                        due.extend(entries);
                    }
                }
                due
            };

            if due.is_empty() {
                break;
            }

            for entry in due {
                if entry.cancelled.load(Ordering::Acquire) {
                    trace!(entry_id = entry.id, "skipping cancelled callback");
                    continue;
                }

                let ctx = TickContext {
                    tick: now,
                    cancelled: Arc::clone(&entry.cancelled),
                };
                (entry.run)(&ctx);

                // Periodic entries reschedule themselves unless the callback
                // cancelled its own entry during the run.
                if let Some(every) = entry.every {
                    if !entry.cancelled.load(Ordering::Acquire) {
                        let mut timeline =
                            self.inner.timeline.lock().expect("timeline lock poisoned");
                        timeline.entry(now + every).or_default().push(entry);
                    }
                }
            }
        }

        self.inner.now.fetch_add(1, Ordering::Release);
    }

    /// Advance time by `n` ticks.
    pub fn advance(&self, n: u64) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Number of live (non-cancelled) entries currently on the timeline.
    pub fn pending(&self) -> usize {
        let timeline = self.inner.timeline.lock().expect("timeline lock poisoned");
        timeline
            .values()
            .flatten()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .count()
    }

    /// Spawn a background loop that calls [`tick`](Self::tick) once per
    /// `period` of wall-clock time.  This is the production driver; tests
    /// tick manually instead.
    pub fn drive(&self, period: Duration) -> JoinHandle<()> {
        self.inner.halted.store(false, Ordering::Release);
        let driver = self.clone();
        tokio::spawn(async move {
            debug!(period_ms = period.as_millis() as u64, "tick driver started");
            loop {
                if driver.inner.halted.load(Ordering::Acquire) {
                    break;
                }
                driver.tick();
                tokio::time::sleep(period).await;
            }
            debug!("tick driver halted");
        })
    }

    /// Stop a running [`drive`](Self::drive) loop after its current tick.
    pub fn halt(&self) {
        self.inner.halted.store(true, Ordering::Release);
    }
}

impl Default for TickDriver {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
