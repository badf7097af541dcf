//! Sale Ledger Service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::SaleId;
use domain::{NewSale, Sale, SaleFilter, SaleStatus};
use uuid::Uuid;

use super::ServiceError;

/// Operations the coordinator needs from the Sale Ledger Service.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Stores a new sale in `pending` status and assigns its id.
    ///
    /// A second call carrying the same `request_id` returns the sale stored
    /// by the first.
    async fn create_sale(&self, sale: NewSale) -> Result<Sale, ServiceError>;

    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, ServiceError>;

    /// Moves a sale to `status`. Setting the status it already has is a no-op.
    async fn update_status(&self, id: SaleId, status: SaleStatus) -> Result<Sale, ServiceError>;

    /// Lists sales matching `filter`, oldest first.
    async fn list_sales(&self, filter: &SaleFilter) -> Result<Vec<Sale>, ServiceError>;
}

#[async_trait]
impl<T: LedgerService + ?Sized> LedgerService for Arc<T> {
    async fn create_sale(&self, sale: NewSale) -> Result<Sale, ServiceError> {
        (**self).create_sale(sale).await
    }

    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, ServiceError> {
        (**self).get_sale(id).await
    }

    async fn update_status(&self, id: SaleId, status: SaleStatus) -> Result<Sale, ServiceError> {
        (**self).update_status(id, status).await
    }

    async fn list_sales(&self, filter: &SaleFilter) -> Result<Vec<Sale>, ServiceError> {
        (**self).list_sales(filter).await
    }
}

#[derive(Debug, Default)]
struct InMemoryLedgerState {
    sales: HashMap<SaleId, Sale>,
    order: Vec<SaleId>,
    by_request: HashMap<Uuid, SaleId>,
    fail_next_creates: u32,
    fail_next_updates: u32,
    fail_updates_to: Option<SaleStatus>,
    fail_next_lists: u32,
}

/// In-memory ledger for tests and the demo binary.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerService {
    state: Arc<Mutex<InMemoryLedgerState>>,
}

impl InMemoryLedgerService {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryLedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a sale as-is, bypassing the coordinator.
    pub fn insert_sale(&self, sale: Sale) {
        let mut state = self.lock();
        if let Some(request_id) = sale.request_id {
            state.by_request.insert(request_id, sale.id);
        }
        if !state.sales.contains_key(&sale.id) {
            state.order.push(sale.id);
        }
        state.sales.insert(sale.id, sale);
    }

    /// Returns the current status of a sale.
    pub fn status_of(&self, id: SaleId) -> Option<SaleStatus> {
        self.lock().sales.get(&id).map(|s| s.status)
    }

    /// Returns the number of stored sales.
    pub fn sale_count(&self) -> usize {
        self.lock().sales.len()
    }

    /// Makes the next `n` create calls fail transiently.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().fail_next_creates = n;
    }

    /// Makes the next `n` status updates fail transiently.
    pub fn fail_next_updates(&self, n: u32) {
        self.lock().fail_next_updates = n;
    }

    /// Makes every update to `status` fail transiently until reset.
    pub fn fail_updates_to(&self, status: Option<SaleStatus>) {
        self.lock().fail_updates_to = status;
    }

    /// Makes the next `n` list calls fail transiently.
    pub fn fail_next_lists(&self, n: u32) {
        self.lock().fail_next_lists = n;
    }
}

#[async_trait]
impl LedgerService for InMemoryLedgerService {
    async fn create_sale(&self, sale: NewSale) -> Result<Sale, ServiceError> {
        let mut state = self.lock();
        if state.fail_next_creates > 0 {
            state.fail_next_creates -= 1;
            return Err(ServiceError::Transient("ledger returned 503".into()));
        }

        if let Some(request_id) = sale.request_id
            && let Some(existing) = state
                .by_request
                .get(&request_id)
                .and_then(|id| state.sales.get(id))
        {
            return Ok(existing.clone());
        }

        let stored = sale.into_sale(SaleId::new());
        if let Some(request_id) = stored.request_id {
            state.by_request.insert(request_id, stored.id);
        }
        state.order.push(stored.id);
        state.sales.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, ServiceError> {
        Ok(self.lock().sales.get(&id).cloned())
    }

    async fn update_status(&self, id: SaleId, status: SaleStatus) -> Result<Sale, ServiceError> {
        let mut state = self.lock();
        if state.fail_updates_to == Some(status) {
            return Err(ServiceError::Transient("ledger returned 503".into()));
        }
        if state.fail_next_updates > 0 {
            state.fail_next_updates -= 1;
            return Err(ServiceError::Transient("ledger returned 503".into()));
        }

        let sale = state
            .sales
            .get_mut(&id)
            .ok_or(ServiceError::SaleNotFound(id))?;
        sale.transition(status)
            .map_err(|e| ServiceError::Rejected(e.to_string()))?;
        Ok(sale.clone())
    }

    async fn list_sales(&self, filter: &SaleFilter) -> Result<Vec<Sale>, ServiceError> {
        let mut state = self.lock();
        if state.fail_next_lists > 0 {
            state.fail_next_lists -= 1;
            return Err(ServiceError::Transient("ledger returned 503".into()));
        }
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.sales.get(id))
            .filter(|sale| filter.matches(sale))
            .cloned()
            .collect())
    }
}
