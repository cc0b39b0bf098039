//! Hostkit host runtime.
//!
//! One [`HostRuntime`] per host process: it owns the [`Scheduler`] and the
//! [`StoreRegistry`], wires every store's periodic flush onto the shared
//! tick driver, and tears both down in the right order on shutdown
//! (sequences first, so no flush fires into a closing store, then the
//! stores themselves with a final synchronous flush).

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use hostkit_sched::{Scheduler, SequenceBuilder, TickDriver};
use hostkit_store::{Store, StoreConfig, StoreRegistry, StoreResult};

/// Shared scheduler + store registry for one host process.
///
/// Cheaply cloneable; all clones share the same driver, sequences, and
/// stores.
#[derive(Clone)]
pub struct HostRuntime {
    driver: TickDriver,
    scheduler: Scheduler,
    stores: StoreRegistry,
}

impl HostRuntime {
    /// Create a runtime whose scheduler is always enabled.
    #[must_use]
    pub fn new(driver: TickDriver) -> Self {
        let scheduler = Scheduler::new(driver.clone());
        Self {
            driver,
            scheduler,
            stores: StoreRegistry::new(),
        }
    }

    /// Create a runtime with a host enablement check; while it returns
    /// `false`, starting any sequence is a no-op.
    pub fn with_enablement(
        driver: TickDriver,
        enabled: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        let scheduler = Scheduler::with_enablement(driver.clone(), enabled);
        Self {
            driver,
            scheduler,
            stores: StoreRegistry::new(),
        }
    }

    /// The shared tick driver.
    pub fn driver(&self) -> &TickDriver {
        &self.driver
    }

    /// The shared scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The shared store registry.
    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    /// Start building an action sequence on the shared scheduler.
    pub fn sequence(&self) -> SequenceBuilder {
        self.scheduler.sequence()
    }

    /// Open a store tracked by this runtime.  Periodic-flush stores run
    /// their flush sequence on the shared scheduler.
    pub fn open_store(&self, config: StoreConfig) -> StoreResult<Store> {
        self.stores.open(config, Some(&self.scheduler))
    }

    /// Spawn the wall-clock tick loop.  Tests drive ticks manually instead.
    pub fn drive(&self, period: Duration) -> JoinHandle<()> {
        self.driver.drive(period)
    }

    /// Shut the runtime down: destroy every sequence, then close every
    /// store (flushing buffered writes), then halt the tick loop.
    pub async fn shutdown(&self) {
        info!(
            sequences = self.scheduler.count(),
            stores = self.stores.count(),
            "runtime shutting down"
        );
        self.scheduler.destroy_all();
        self.stores.close_all().await;
        self.driver.halt();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_empties_both_registries() {
        let runtime = HostRuntime::new(TickDriver::new());

        let seq = runtime.sequence().delay(5).build();
        seq.start(true).unwrap();
        runtime.open_store(StoreConfig::new("alpha").in_memory()).unwrap();
        assert_eq!(runtime.scheduler().count(), 1);
        assert_eq!(runtime.stores().count(), 1);

        runtime.shutdown().await;
        assert_eq!(runtime.scheduler().count(), 0);
        assert_eq!(runtime.stores().count(), 0);
    }

    #[tokio::test]
    async fn disabled_runtime_builds_but_does_not_run_sequences() {
        let driver = TickDriver::new();
        let runtime = HostRuntime::with_enablement(driver.clone(), || false);

        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let f = fired.clone();
        let seq = runtime
            .sequence()
            .task(move || f.store(true, std::sync::atomic::Ordering::SeqCst))
            .build();
        seq.start(true).unwrap();

        driver.advance(3);
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
