use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    IdempotencyEntry, ReconciliationEntry, ReconciliationStatus, Result, SaleId, SagaOperation,
    SagaRecord, StoreError, store::SagaStore,
};

type SagaKey = (SaleId, SagaOperation);

#[derive(Default)]
struct State {
    sagas: HashMap<SagaKey, SagaRecord>,
    outcomes: HashMap<String, IdempotencyEntry>,
    reconciliation: HashMap<SagaKey, ReconciliationEntry>,
}

/// In-memory saga store for tests and single-process deployments.
///
/// All three collections sit behind one lock so `begin_saga` can check and
/// insert atomically, the same guarantee the Postgres partial unique index gives.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<State>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of saga records stored.
    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }

    /// Returns the number of cached idempotency outcomes.
    pub async fn outcome_count(&self) -> usize {
        self.state.read().await.outcomes.len()
    }

    /// Clears all stored state.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.sagas.clear();
        state.outcomes.clear();
        state.reconciliation.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn begin_saga(&self, record: &SagaRecord) -> Result<i64> {
        let mut state = self.state.write().await;

        if let Some(active) = state
            .sagas
            .values()
            .find(|r| r.sale_id == record.sale_id && r.state.is_active())
        {
            return Err(StoreError::SagaAlreadyActive {
                sale_id: record.sale_id,
                active: active.operation,
            });
        }

        let key = (record.sale_id, record.operation);
        if state.sagas.contains_key(&key) {
            return Err(StoreError::DuplicateSaga {
                sale_id: record.sale_id,
                operation: record.operation,
            });
        }

        let mut stored = record.clone();
        stored.version = 1;
        state.sagas.insert(key, stored);
        Ok(1)
    }

    async fn get_saga(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<SagaRecord>> {
        Ok(self
            .state
            .read()
            .await
            .sagas
            .get(&(sale_id, operation))
            .cloned())
    }

    async fn update_saga(&self, record: &SagaRecord) -> Result<i64> {
        let mut state = self.state.write().await;
        let key = (record.sale_id, record.operation);

        let current = state.sagas.get(&key).ok_or(StoreError::NotFound {
            sale_id: record.sale_id,
            operation: record.operation,
        })?;

        if current.version != record.version {
            return Err(StoreError::ConcurrencyConflict {
                sale_id: record.sale_id,
                operation: record.operation,
                expected: record.version,
                actual: current.version,
            });
        }

        // Re-entering an active state must not collide with the other operation.
        if record.state.is_active()
            && let Some(other) = state.sagas.values().find(|r| {
                r.sale_id == record.sale_id && r.operation != record.operation && r.state.is_active()
            })
        {
            return Err(StoreError::SagaAlreadyActive {
                sale_id: record.sale_id,
                active: other.operation,
            });
        }

        let mut stored = record.clone();
        stored.version = record.version + 1;
        stored.updated_at = Utc::now();
        let version = stored.version;
        state.sagas.insert(key, stored);
        Ok(version)
    }

    async fn sagas_for_sale(&self, sale_id: SaleId) -> Result<Vec<SagaRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .sagas
            .values()
            .filter(|r| r.sale_id == sale_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn in_flight_sagas(&self) -> Result<Vec<SagaRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .sagas
            .values()
            .filter(|r| r.state.is_in_flight())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn get_outcome(&self, key: &str) -> Result<Option<IdempotencyEntry>> {
        Ok(self.state.read().await.outcomes.get(key).cloned())
    }

    async fn put_outcome(&self, entry: &IdempotencyEntry) -> Result<()> {
        self.state
            .write()
            .await
            .outcomes
            .entry(entry.key.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn enqueue_reconciliation(&self, entry: &ReconciliationEntry) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (entry.sale_id, entry.operation);
        if state.reconciliation.contains_key(&key) {
            return Ok(false);
        }
        state.reconciliation.insert(key, entry.clone());
        Ok(true)
    }

    async fn get_reconciliation(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<ReconciliationEntry>> {
        Ok(self
            .state
            .read()
            .await
            .reconciliation
            .get(&(sale_id, operation))
            .cloned())
    }

    async fn update_reconciliation(&self, entry: &ReconciliationEntry) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (entry.sale_id, entry.operation);
        match state.reconciliation.get_mut(&key) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                sale_id: entry.sale_id,
                operation: entry.operation,
            }),
        }
    }

    async fn list_reconciliation(
        &self,
        status: Option<ReconciliationStatus>,
    ) -> Result<Vec<ReconciliationEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .reconciliation
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.enqueued_at);
        Ok(entries)
    }
}
