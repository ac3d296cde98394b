//! In-process serialisation of draft creation, merging and sending per supplier.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// One async mutex per supplier. Entries are dropped again once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct SupplierLocks {
    locks: Arc<LockMap>,
}

/// Held for the duration of a draft mutation or a send.
pub struct SupplierGuard {
    supplier_id: Uuid,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SupplierLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, supplier_id: Uuid) -> SupplierGuard {
        let lock = self
            .locks
            .entry(supplier_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        SupplierGuard {
            supplier_id,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of suppliers with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for SupplierGuard {
    fn drop(&mut self) {
        self.guard.take();
        // only the map itself still references an idle lock
        self.locks
            .remove_if(&self.supplier_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
