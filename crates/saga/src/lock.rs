//! Per-sale mutual exclusion within one coordinator process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::SaleId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<SaleId, Arc<AsyncMutex<()>>>;

/// Keyed async locks, one per sale with a saga in progress.
///
/// Entries are removed when their last holder or waiter goes away, so the map
/// only ever holds sales that are being worked on. Across processes the
/// store's one-active-saga rule provides the same exclusion.
#[derive(Clone, Default)]
pub struct SaleLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Holds a sale's lock until dropped.
pub struct SaleLockGuard {
    sale_id: SaleId,
    locks: SaleLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SaleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, sale_id: SaleId) -> Arc<AsyncMutex<()>> {
        self.map().entry(sale_id).or_default().clone()
    }

    fn release_if_idle(&self, sale_id: SaleId) {
        let mut map = self.map();
        if let Some(lock) = map.get(&sale_id)
            && Arc::strong_count(lock) == 1
        {
            map.remove(&sale_id);
        }
    }

    /// Waits for the sale's lock.
    pub async fn acquire(&self, sale_id: SaleId) -> SaleLockGuard {
        let guard = self.entry(sale_id).lock_owned().await;
        SaleLockGuard {
            sale_id,
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    /// Waits up to `timeout` for the sale's lock.
    pub async fn acquire_timeout(&self, sale_id: SaleId, timeout: Duration) -> Option<SaleLockGuard> {
        let lock = self.entry(sale_id);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Some(SaleLockGuard {
                sale_id,
                locks: self.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_if_idle(sale_id);
                None
            }
        }
    }

    /// Takes the sale's lock only if nobody holds it.
    pub fn try_acquire(&self, sale_id: SaleId) -> Option<SaleLockGuard> {
        let lock = self.entry(sale_id);
        match lock.try_lock_owned() {
            Ok(guard) => Some(SaleLockGuard {
                sale_id,
                locks: self.clone(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_if_idle(sale_id);
                None
            }
        }
    }

    /// Number of sales with a live lock entry.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SaleLockGuard {
    pub fn sale_id(&self) -> SaleId {
        self.sale_id
    }
}

impl Drop for SaleLockGuard {
    fn drop(&mut self) {
        // Release the mutex first so its Arc no longer counts toward the entry.
        drop(self.guard.take());
        self.locks.release_if_idle(self.sale_id);
    }
}
