//! Scheduler front-end and sequence registry.
//!
//! A [`Scheduler`] pairs a [`TickDriver`] with a host enablement check and
//! tracks every live [`ActionSequence`] built through it.  The registry is
//! backed by [`DashMap`] so registration and removal are safe while a bulk
//! [`destroy_all`](Scheduler::destroy_all) iterates concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SchedError};
use crate::sequence::{ActionSequence, SequenceBuilder, SequenceInfo};
use crate::tick::TickDriver;

/// Host-supplied check consulted on every sequence start.
pub type EnabledFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Tick-driven scheduler handle.
///
/// Cheaply cloneable; all clones share one driver and one running set.
#[derive(Clone)]
pub struct Scheduler {
    driver: TickDriver,
    enabled: EnabledFn,
    sequences: Arc<DashMap<Uuid, ActionSequence>>,
}

impl Scheduler {
    /// Create a scheduler whose enablement check always passes.
    #[must_use]
    pub fn new(driver: TickDriver) -> Self {
        Self::with_enablement(driver, || true)
    }

    /// Create a scheduler with a host enablement check.  While the check
    /// returns `false`, starting any sequence is a no-op.
    pub fn with_enablement(
        driver: TickDriver,
        enabled: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            driver,
            enabled: Arc::new(enabled),
            sequences: Arc::new(DashMap::new()),
        }
    }

    /// The tick driver this scheduler compiles callbacks onto.
    pub fn driver(&self) -> &TickDriver {
        &self.driver
    }

    /// Evaluate the host enablement check.
    pub fn is_enabled(&self) -> bool {
        (self.enabled)()
    }

    /// Start building a new action sequence.
    pub fn sequence(&self) -> SequenceBuilder {
        SequenceBuilder::new(self.clone())
    }

    /// Look up a live sequence by id.
    pub fn get(&self, id: Uuid) -> Result<ActionSequence> {
        self.sequences
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(SchedError::SequenceNotFound { id })
    }

    /// Snapshot of every live sequence.
    pub fn sequences(&self) -> Vec<SequenceInfo> {
        self.sequences.iter().map(|e| e.value().info()).collect()
    }

    /// Number of live sequences.
    pub fn count(&self) -> usize {
        self.sequences.len()
    }

    /// Destroy every live sequence.  Part of process-wide shutdown.
    pub fn destroy_all(&self) {
        let live: Vec<ActionSequence> = self
            .sequences
            .iter()
            .map(|e| e.value().clone())
            .collect();
        info!(count = live.len(), "destroying all sequences");
        for seq in live {
            seq.destroy();
        }
    }

    pub(crate) fn register(&self, seq: &ActionSequence) {
        self.sequences.insert(seq.id(), seq.clone());
        debug!(sequence_id = %seq.id(), "sequence registered");
    }

    pub(crate) fn unregister(&self, id: Uuid) {
        if self.sequences.remove(&id).is_some() {
            debug!(sequence_id = %id, "sequence unregistered");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_registers_and_destroy_unregisters() {
        let scheduler = Scheduler::new(TickDriver::new());
        let seq = scheduler.sequence().delay(1).build();
        assert_eq!(scheduler.count(), 1);
        assert!(scheduler.get(seq.id()).is_ok());

        seq.destroy();
        assert_eq!(scheduler.count(), 0);
        assert!(matches!(
            scheduler.get(seq.id()),
            Err(SchedError::SequenceNotFound { .. })
        ));
    }

    #[test]
    fn destroy_all_empties_the_registry() {
        let scheduler = Scheduler::new(TickDriver::new());
        let a = scheduler.sequence().delay(1).build();
        let b = scheduler.sequence().delay(2).build();
        assert_eq!(scheduler.count(), 2);

        scheduler.destroy_all();
        assert_eq!(scheduler.count(), 0);
        assert!(a.start(true).is_err());
        assert!(b.start(true).is_err());
    }

    #[test]
    fn sequences_snapshot_lists_all() {
        let scheduler = Scheduler::new(TickDriver::new());
        scheduler.sequence().delay(1).build();
        scheduler.sequence().delay(1).delay(2).build();

        let infos = scheduler.sequences();
        assert_eq!(infos.len(), 2);
    }
}
