use async_trait::async_trait;

use crate::{
    IdempotencyEntry, ReconciliationEntry, ReconciliationStatus, Result, SaleId, SagaOperation,
    SagaRecord,
};

/// Core trait for coordinator state storage.
///
/// Implementations must be thread-safe (Send + Sync) and must enforce the
/// per-sale mutual exclusion rule themselves: `begin_saga` refuses a second
/// active record for the same sale even when called from two coordinator
/// instances at once.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new saga record.
    ///
    /// Fails with `SagaAlreadyActive` if another active record exists for the
    /// sale, and with `DuplicateSaga` if a record for the same
    /// `(sale_id, operation)` already exists. Returns the stored version.
    async fn begin_saga(&self, record: &SagaRecord) -> Result<i64>;

    /// Retrieves the record for one saga of a sale.
    async fn get_saga(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<SagaRecord>>;

    /// Writes back a record read earlier.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version is no longer
    /// `record.version`. Returns the new version.
    async fn update_saga(&self, record: &SagaRecord) -> Result<i64>;

    /// Retrieves every saga record for a sale, oldest first.
    async fn sagas_for_sale(&self, sale_id: SaleId) -> Result<Vec<SagaRecord>>;

    /// Retrieves records left mid-step (`stock_committing`, `cancel_committing`).
    async fn in_flight_sagas(&self) -> Result<Vec<SagaRecord>>;

    /// Retrieves a cached inventory outcome.
    async fn get_outcome(&self, key: &str) -> Result<Option<IdempotencyEntry>>;

    /// Stores an inventory outcome. The first write for a key wins; later
    /// writes for the same key are ignored.
    async fn put_outcome(&self, entry: &IdempotencyEntry) -> Result<()>;

    /// Adds a saga to the reconciliation queue.
    ///
    /// Returns false without changing anything if an entry for the same
    /// `(sale_id, operation)` already exists.
    async fn enqueue_reconciliation(&self, entry: &ReconciliationEntry) -> Result<bool>;

    /// Retrieves one reconciliation entry.
    async fn get_reconciliation(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<ReconciliationEntry>>;

    /// Overwrites an existing reconciliation entry.
    async fn update_reconciliation(&self, entry: &ReconciliationEntry) -> Result<()>;

    /// Lists reconciliation entries, oldest first, optionally by status.
    async fn list_reconciliation(
        &self,
        status: Option<ReconciliationStatus>,
    ) -> Result<Vec<ReconciliationEntry>>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Returns the active saga for a sale, if any.
    async fn active_saga(&self, sale_id: SaleId) -> Result<Option<SagaRecord>> {
        Ok(self
            .sagas_for_sale(sale_id)
            .await?
            .into_iter()
            .find(|r| r.state.is_active()))
    }

    /// Counts entries waiting on the background worker.
    async fn open_reconciliation_count(&self) -> Result<usize> {
        Ok(self
            .list_reconciliation(Some(ReconciliationStatus::Open))
            .await?
            .len())
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}
