//! Process-wide store registry.
//!
//! Every store opened through a [`StoreRegistry`] is tracked until it
//! closes, so host shutdown can flush and close all of them in one call.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info};
use uuid::Uuid;

use hostkit_sched::Scheduler;

use crate::error::StoreResult;
use crate::store::{Store, StoreConfig, StoreInfo};

/// Registry of live stores.
///
/// Cheaply cloneable; all clones share one tracking set.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: Arc<DashMap<Uuid, Store>>,
}

impl StoreRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store and track it until it closes.
    pub fn open(&self, config: StoreConfig, scheduler: Option<&Scheduler>) -> StoreResult<Store> {
        let store = Store::open(config, scheduler)?;
        store.attach_registry(self.clone());
        self.stores.insert(store.id(), store.clone());
        Ok(store)
    }

    /// Look up a live store by id.
    pub fn get(&self, id: Uuid) -> Option<Store> {
        self.stores.get(&id).map(|e| e.value().clone())
    }

    /// Number of live stores.
    pub fn count(&self) -> usize {
        self.stores.len()
    }

    /// Metadata snapshot of every live store.
    pub fn stores(&self) -> Vec<StoreInfo> {
        self.stores.iter().map(|e| e.value().info()).collect()
    }

    /// Close every live store, flushing buffered writes.
    ///
    /// Every store is attempted; a failed close is logged and does not stop
    /// the pass.  Returns the number of stores that closed cleanly.
    pub async fn close_all(&self) -> usize {
        let live: Vec<Store> = self.stores.iter().map(|e| e.value().clone()).collect();
        info!(count = live.len(), "closing all stores");

        let mut clean = 0;
        for store in live {
            match store.close().await {
                Ok(()) => clean += 1,
                Err(err) => {
                    error!(store_id = %store.id(), database = %store.database(), error = %err, "store close failed");
                }
            }
        }
        clean
    }

    pub(crate) fn detach(&self, id: Uuid) {
        self.stores.remove(&id);
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CacheMode;

    #[tokio::test]
    async fn open_tracks_and_close_detaches() {
        let registry = StoreRegistry::new();
        let store = registry
            .open(StoreConfig::new("alpha").in_memory(), None)
            .unwrap();
        assert_eq!(registry.count(), 1);
        assert!(registry.get(store.id()).is_some());

        store.close().await.unwrap();
        assert_eq!(registry.count(), 0);
        assert!(registry.get(store.id()).is_none());
    }

    #[tokio::test]
    async fn close_all_closes_every_store() {
        let registry = StoreRegistry::new();
        let a = registry
            .open(
                StoreConfig::new("alpha").in_memory().mode(CacheMode::Full),
                None,
            )
            .unwrap();
        let b = registry
            .open(StoreConfig::new("beta").in_memory(), None)
            .unwrap();
        assert_eq!(registry.count(), 2);

        assert_eq!(registry.close_all().await, 2);
        assert_eq!(registry.count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn close_all_on_empty_registry_is_a_noop() {
        let registry = StoreRegistry::new();
        assert_eq!(registry.close_all().await, 0);
    }
}
