//! Sale transaction coordinator: the create and cancel sagas.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::SaleId;
use domain::{
    Cart, CartLine, CompensationEntry, CustomerInfo, NewSale, PaymentMethod, ProductId, Sale,
    SaleFilter, SaleStatus, StockItem,
};
use saga_store::{
    ReconciliationEntry, ReconciliationStatus, SagaOperation, SagaRecord, SagaState, SagaStore,
    StoreError,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::guard::IdempotencyGuard;
use crate::lock::SaleLocks;
use crate::reconciliation::{ReconcileReport, ReconciliationQueue};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::services::{InventoryService, LedgerService, ServiceError};
use crate::validator::{CartPreview, StockValidator};

/// Name stamped on entries the background worker resolves.
pub const RECONCILER: &str = "reconciler";

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    /// How long a cancellation waits for a running saga on the same sale.
    pub lock_timeout: Duration,
    /// Failed reconciliation attempts before an entry is parked for an operator.
    pub reconcile_max_attempts: u32,
    /// Age after which a pending ledger sale without a saga record is adopted
    /// by [`SaleCoordinator::recover_in_flight`].
    pub orphan_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lock_timeout: Duration::from_secs(2),
            reconcile_max_attempts: 20,
            orphan_grace: Duration::from_secs(60),
        }
    }
}

/// Input to [`SaleCoordinator::create_sale`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSaleRequest {
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub customer_info: Option<CustomerInfo>,
    #[serde(default)]
    pub seller_id: Option<String>,
    /// Client idempotency key. A repeated key returns the sale the first
    /// request created.
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

impl CreateSaleRequest {
    pub fn new(lines: Vec<CartLine>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn with_payment_method(mut self, payment_method: PaymentMethod) -> Self {
        self.payment_method = payment_method;
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

/// What a caller gets back from a create or cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub sale: Sale,
    /// The inventory leg is owed and sits in the reconciliation queue.
    pub stock_sync_pending: bool,
    /// Nothing was done: the request repeated one that already finished.
    pub replayed: bool,
}

impl SaleReceipt {
    fn fresh(sale: Sale) -> Self {
        Self {
            stock_sync_pending: sale.status == SaleStatus::StockSyncPending,
            sale,
            replayed: false,
        }
    }

    fn replayed(sale: Sale) -> Self {
        Self {
            replayed: true,
            ..Self::fresh(sale)
        }
    }
}

/// Counts from [`SaleCoordinator::recover_in_flight`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted sagas driven to an outcome.
    pub resumed: usize,
    /// Pending sales with no saga record that were committed.
    pub adopted: usize,
    /// Conflicted sales whose ledger cancellation was finished.
    pub repaired: usize,
    pub failed: usize,
}

/// Ledger status a saga of `operation` leaves its sale in.
fn target_status(operation: SagaOperation) -> SaleStatus {
    match operation {
        SagaOperation::Create => SaleStatus::Completed,
        SagaOperation::Cancel => SaleStatus::Cancelled,
    }
}

/// A create saga aborted on a stock conflict that still owes the ledger its
/// cancellation.
fn aborted_create(record: &SagaRecord) -> bool {
    record.operation == SagaOperation::Create && record.state == SagaState::Cancelled
}

fn advance(record: &mut SagaRecord, next: SagaState) -> Result<()> {
    let moved = record.transition(next);
    moved.map_err(|from| SagaError::InvalidState {
        sale_id: record.sale_id,
        reason: format!("{} saga cannot move from {from} to {next}", record.operation),
    })
}

/// Runs the create and cancel sagas against the Inventory and Sale Ledger
/// services.
///
/// The ledger leg runs first in both sagas; the inventory leg goes through
/// the idempotency guard so a retried or resumed saga never applies a
/// mutation twice. When the inventory leg runs out of retries the sale is
/// kept, flagged `stock_sync_pending`, and handed to the reconciliation queue.
pub struct SaleCoordinator<S, I, L> {
    store: S,
    inventory: I,
    ledger: L,
    guard: IdempotencyGuard<S>,
    validator: StockValidator<I>,
    queue: ReconciliationQueue<S>,
    locks: SaleLocks,
    config: CoordinatorConfig,
}

impl<S, I, L> SaleCoordinator<S, I, L>
where
    S: SagaStore + Clone,
    I: InventoryService + Clone,
    L: LedgerService,
{
    pub fn new(store: S, inventory: I, ledger: L) -> Self {
        Self::with_config(store, inventory, ledger, CoordinatorConfig::default())
    }

    pub fn with_config(store: S, inventory: I, ledger: L, config: CoordinatorConfig) -> Self {
        Self {
            guard: IdempotencyGuard::new(store.clone()),
            queue: ReconciliationQueue::new(store.clone()),
            validator: StockValidator::new(inventory.clone(), config.retry.clone()),
            store,
            inventory,
            ledger,
            locks: SaleLocks::new(),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn queue(&self) -> &ReconciliationQueue<S> {
        &self.queue
    }

    pub fn locks(&self) -> &SaleLocks {
        &self.locks
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Validates the cart, records a pending sale, and commits its stock.
    ///
    /// Errors before the ledger write leave nothing behind. Once the sale is
    /// recorded, exhausted inventory retries still return `Ok`, with
    /// `stock_sync_pending` set.
    #[tracing::instrument(skip_all, fields(lines = request.lines.len(), request_id = ?request.request_id))]
    pub async fn create_sale(&self, request: CreateSaleRequest) -> Result<SaleReceipt> {
        metrics::counter!("sale_sagas_started_total", "operation" => "create").increment(1);
        let started = Instant::now();

        let cart = Cart::new(request.lines)?;
        let snapshots = self.validator.validate(&cart).await?;

        let new_sale = NewSale::from_snapshots(&snapshots, request.payment_method)?
            .with_request_id(Some(request.request_id.unwrap_or_else(Uuid::new_v4)))
            .with_seller(request.seller_id)
            .with_customer(request.customer_info);

        let outcome = self
            .config
            .retry
            .run("ledger_create", || self.ledger.create_sale(new_sale.clone()))
            .await;
        let sale = outcome
            .result
            .map_err(|e| SagaError::exhausted("ledger_create", outcome.attempts, e))?;

        if sale.status != SaleStatus::Pending {
            tracing::info!(sale_id = %sale.id, status = %sale.status, "create request replayed");
            return self.replay(sale).await;
        }

        let _lock = self.locks.acquire(sale.id).await;
        let mut record = SagaRecord::begin(sale.id, SagaOperation::Create);
        match self.store.begin_saga(&record).await {
            Ok(version) => record.version = version,
            Err(StoreError::DuplicateSaga { .. } | StoreError::SagaAlreadyActive { .. }) => {
                let current = self.load_sale(sale.id).await?;
                tracing::info!(sale_id = %sale.id, status = %current.status, "create request replayed");
                return self.replay(current).await;
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(sale_id = %sale.id, total = %sale.total, "sale recorded as pending");

        let receipt = self.drive_create(sale, record).await;
        metrics::histogram!("sale_saga_duration_seconds", "operation" => "create")
            .record(started.elapsed().as_secs_f64());
        receipt
    }

    /// Cancels a completed sale and returns its stock.
    ///
    /// Cancelling an already cancelled sale is a no-op that returns the sale
    /// with `replayed` set. A sale still pending after losing its stock at
    /// commit gets the ledger cancellation it is owed.
    #[tracing::instrument(skip_all, fields(%sale_id))]
    pub async fn cancel_sale(&self, sale_id: SaleId) -> Result<SaleReceipt> {
        metrics::counter!("sale_sagas_started_total", "operation" => "cancel").increment(1);
        let started = Instant::now();

        let Some(_lock) = self
            .locks
            .acquire_timeout(sale_id, self.config.lock_timeout)
            .await
        else {
            return Err(SagaError::InvalidState {
                sale_id,
                reason: "another saga is still running for this sale".into(),
            });
        };

        let sale = self.load_sale(sale_id).await?;
        let record = match sale.status {
            SaleStatus::Completed => self.begin_cancel(sale_id).await?,
            SaleStatus::Cancelled => match self.store.get_saga(sale_id, SagaOperation::Cancel).await? {
                Some(record) if record.state.is_in_flight() => record,
                _ => {
                    tracing::info!("sale already cancelled");
                    return self.replay(sale).await;
                }
            },
            SaleStatus::Pending
                if self
                    .store
                    .get_saga(sale_id, SagaOperation::Create)
                    .await?
                    .is_some_and(|record| aborted_create(&record)) =>
            {
                let cancelled = self.finish_aborted_create(sale_id).await?;
                tracing::info!("finished cancelling a sale that lost its stock at commit");
                return Ok(SaleReceipt::fresh(cancelled));
            }
            SaleStatus::Pending | SaleStatus::StockSyncPending => {
                return Err(SagaError::InvalidState {
                    sale_id,
                    reason: format!("cannot cancel a sale in {} status", sale.status),
                });
            }
        };

        let receipt = self.drive_cancel(sale, record).await;
        metrics::histogram!("sale_saga_duration_seconds", "operation" => "cancel")
            .record(started.elapsed().as_secs_f64());
        receipt
    }

    async fn begin_cancel(&self, sale_id: SaleId) -> Result<SagaRecord> {
        let mut record = SagaRecord::begin(sale_id, SagaOperation::Cancel);
        match self.store.begin_saga(&record).await {
            Ok(version) => {
                record.version = version;
                Ok(record)
            }
            // An earlier attempt stopped before the ledger leg went through.
            Err(StoreError::SagaAlreadyActive {
                active: SagaOperation::Cancel,
                ..
            }) => self
                .store
                .get_saga(sale_id, SagaOperation::Cancel)
                .await?
                .filter(|r| r.state.is_in_flight())
                .ok_or_else(|| SagaError::InvalidState {
                    sale_id,
                    reason: "cancellation is awaiting reconciliation".into(),
                }),
            Err(StoreError::SagaAlreadyActive { active, .. }) => Err(SagaError::InvalidState {
                sale_id,
                reason: format!("a {active} saga is still active"),
            }),
            Err(StoreError::DuplicateSaga { .. }) => Err(SagaError::InvalidState {
                sale_id,
                reason: "sale has already been through a cancellation".into(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn drive_create(&self, sale: Sale, mut record: SagaRecord) -> Result<SaleReceipt> {
        let outcome = self.commit_inventory(&sale, SagaOperation::Create).await;
        record.record_attempts(outcome.attempts, outcome.last_error());

        match outcome.result {
            Ok(_) => self.finish_create(sale, record).await,
            Err(SagaError::Service(ServiceError::InsufficientStock {
                product_id,
                available,
                requested,
            })) => {
                self.abort_on_conflict(sale, record, product_id, available, requested)
                    .await
            }
            Err(e) if e.is_transient() => self.escalate(sale, record, e.to_string(), false).await,
            Err(SagaError::Service(e)) => self.escalate(sale, record, e.to_string(), true).await,
            Err(e) => Err(e),
        }
    }

    async fn finish_create(&self, sale: Sale, mut record: SagaRecord) -> Result<SaleReceipt> {
        match self
            .set_status("ledger_complete", sale.id, SaleStatus::Completed)
            .await
        {
            Ok(completed) => {
                advance(&mut record, SagaState::Completed)?;
                self.save(&mut record).await?;
                metrics::counter!("sale_sagas_completed_total", "operation" => "create")
                    .increment(1);
                tracing::info!(sale_id = %completed.id, "sale completed");
                Ok(SaleReceipt::fresh(completed))
            }
            Err(e) => {
                // The decrement is cached, so reconciliation only has to finish the status.
                let manual = !e.is_transient();
                self.escalate(sale, record, e.to_string(), manual).await
            }
        }
    }

    async fn abort_on_conflict(
        &self,
        sale: Sale,
        mut record: SagaRecord,
        product_id: ProductId,
        available: u32,
        requested: u32,
    ) -> Result<SaleReceipt> {
        metrics::counter!("sale_stock_conflicts_total").increment(1);
        tracing::warn!(
            sale_id = %sale.id,
            %product_id,
            available,
            requested,
            "stock ran out before commit, cancelling sale"
        );

        advance(&mut record, SagaState::Cancelled)?;
        self.save(&mut record).await?;

        if let Err(e) = self
            .set_status("ledger_cancel", sale.id, SaleStatus::Cancelled)
            .await
        {
            tracing::error!(
                sale_id = %sale.id,
                error = %e,
                "could not cancel conflicted sale, queued for reconciliation"
            );
            let entry = ReconciliationEntry::new(sale.id, SagaOperation::Create, Some(e.to_string()));
            if let Err(e) = self.queue.enqueue(entry).await {
                tracing::error!(sale_id = %sale.id, error = %e, "could not queue conflicted sale");
            }
        }

        Err(SagaError::StockConflict {
            sale_id: sale.id,
            product_id,
            available,
            requested,
        })
    }

    async fn drive_cancel(&self, sale: Sale, mut record: SagaRecord) -> Result<SaleReceipt> {
        let sale_id = sale.id;
        let outcome = self
            .config
            .retry
            .run("ledger_cancel", || {
                self.ledger.update_status(sale_id, SaleStatus::Cancelled)
            })
            .await;
        let cancelled = match outcome.result {
            Ok(cancelled) => cancelled,
            Err(e) => {
                // Nothing to compensate yet; the record stays in flight for a retry.
                record.record_attempts(outcome.attempts, Some(e.to_string()));
                self.save(&mut record).await?;
                return Err(SagaError::exhausted("ledger_cancel", outcome.attempts, e));
            }
        };

        let outcome = self.commit_inventory(&cancelled, SagaOperation::Cancel).await;
        record.record_attempts(outcome.attempts, outcome.last_error());

        match outcome.result {
            Ok(restored) => {
                advance(&mut record, SagaState::Cancelled)?;
                self.save(&mut record).await?;
                metrics::counter!("sale_sagas_completed_total", "operation" => "cancel")
                    .increment(1);
                tracing::info!(%sale_id, items = restored.len(), "sale cancelled and stock restored");
                Ok(SaleReceipt::fresh(cancelled))
            }
            Err(e) if e.is_transient() => {
                self.escalate(cancelled, record, e.to_string(), false).await
            }
            Err(SagaError::Service(e)) => {
                self.escalate(cancelled, record, e.to_string(), true).await
            }
            Err(e) => Err(e),
        }
    }

    /// Parks a saga whose inventory leg could not finish.
    async fn escalate(
        &self,
        mut sale: Sale,
        mut record: SagaRecord,
        reason: String,
        manual: bool,
    ) -> Result<SaleReceipt> {
        let operation = record.operation;
        advance(&mut record, SagaState::StockSyncPending)?;
        record.last_error = Some(reason.clone());
        self.save(&mut record).await?;

        match self
            .set_status("ledger_flag_pending", sale.id, SaleStatus::StockSyncPending)
            .await
        {
            Ok(flagged) => sale = flagged,
            Err(e) => {
                tracing::warn!(
                    sale_id = %sale.id,
                    error = %e,
                    "could not flag sale as stock_sync_pending in the ledger"
                );
                sale.status = SaleStatus::StockSyncPending;
            }
        }

        let mut entry = ReconciliationEntry::new(sale.id, operation, Some(reason.clone()));
        if manual {
            entry.status = ReconciliationStatus::ManualActionRequired;
        }
        self.queue.enqueue(entry).await?;

        metrics::counter!("sale_sagas_escalated_total", "operation" => operation.as_str())
            .increment(1);
        tracing::error!(sale_id = %sale.id, %operation, %reason, manual, "saga escalated to reconciliation");

        Ok(SaleReceipt {
            sale,
            stock_sync_pending: true,
            replayed: false,
        })
    }

    /// Applies the inventory leg of `operation` through the guard, with retries.
    async fn commit_inventory(
        &self,
        sale: &Sale,
        operation: SagaOperation,
    ) -> RetryOutcome<Vec<StockItem>, SagaError> {
        let sale_id = sale.id;
        let key = operation.idempotency_key(sale_id);
        let key = key.as_str();
        let guard = &self.guard;
        let inventory = &self.inventory;

        match operation {
            SagaOperation::Create => {
                let items = sale.stock_items();
                let items = items.as_slice();
                self.config
                    .retry
                    .run("inventory_decrement", move || {
                        guard.apply(sale_id, operation, move || inventory.decrement(items, key))
                    })
                    .await
            }
            SagaOperation::Cancel => {
                let items: Vec<StockItem> = CompensationEntry::for_sale(sale)
                    .iter()
                    .map(CompensationEntry::as_stock_item)
                    .collect();
                let items = items.as_slice();
                self.config
                    .retry
                    .run("inventory_increment", move || {
                        guard.apply(sale_id, operation, move || inventory.increment(items, key))
                    })
                    .await
            }
        }
    }

    async fn set_status(
        &self,
        step: &'static str,
        sale_id: SaleId,
        status: SaleStatus,
    ) -> Result<Sale> {
        let outcome = self
            .config
            .retry
            .run(step, || self.ledger.update_status(sale_id, status))
            .await;
        outcome
            .result
            .map_err(|e| SagaError::exhausted(step, outcome.attempts, e))
    }

    /// Moves a conflicted sale to `cancelled` in the ledger and closes its
    /// queue entry, if it has one.
    async fn finish_aborted_create(&self, sale_id: SaleId) -> Result<Sale> {
        let cancelled = self
            .set_status("ledger_cancel", sale_id, SaleStatus::Cancelled)
            .await?;
        if let Some(mut entry) = self.queue.get(sale_id, SagaOperation::Create).await?
            && !entry.is_resolved()
        {
            entry.resolve(RECONCILER, None);
            self.queue.update(&entry).await?;
        }
        Ok(cancelled)
    }

    /// Receipt for a repeated request. Still flags `stock_sync_pending` when
    /// a saga record owes inventory, whatever the ledger says.
    async fn replay(&self, sale: Sale) -> Result<SaleReceipt> {
        let owed = self
            .store
            .sagas_for_sale(sale.id)
            .await?
            .iter()
            .any(|record| record.state == SagaState::StockSyncPending);
        let mut receipt = SaleReceipt::replayed(sale);
        receipt.stock_sync_pending |= owed;
        Ok(receipt)
    }

    async fn load_sale(&self, sale_id: SaleId) -> Result<Sale> {
        let outcome = self
            .config
            .retry
            .run("ledger_get", || self.ledger.get_sale(sale_id))
            .await;
        outcome
            .result
            .map_err(|e| SagaError::exhausted("ledger_get", outcome.attempts, e))?
            .ok_or(SagaError::SaleNotFound(sale_id))
    }

    async fn save(&self, record: &mut SagaRecord) -> Result<()> {
        record.version = self.store.update_saga(record).await?;
        Ok(())
    }

    pub async fn get_sale(&self, sale_id: SaleId) -> Result<Sale> {
        self.load_sale(sale_id).await
    }

    pub async fn list_sales(&self, filter: &SaleFilter) -> Result<Vec<Sale>> {
        let outcome = self
            .config
            .retry
            .run("ledger_list", || self.ledger.list_sales(filter))
            .await;
        outcome
            .result
            .map_err(|e| SagaError::exhausted("ledger_list", outcome.attempts, e))
    }

    /// Saga records for a sale, oldest first.
    pub async fn sagas_for_sale(&self, sale_id: SaleId) -> Result<Vec<SagaRecord>> {
        Ok(self.store.sagas_for_sale(sale_id).await?)
    }

    /// Shows what the cart would look like trimmed to current stock.
    pub async fn preview(&self, lines: Vec<CartLine>) -> Result<CartPreview> {
        let cart = Cart::new(lines)?;
        self.validator.preview(&cart).await
    }

    /// Drives every saga a previous process left mid-step, then commits
    /// pending ledger sales that never got a saga record.
    ///
    /// Meant to run once at startup, before the API takes traffic.
    #[tracing::instrument(skip_all)]
    pub async fn recover_in_flight(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let in_flight = match self.store.in_flight_sagas().await {
            Ok(records) => records,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(error = %e, "could not list in-flight sagas");
                Vec::new()
            }
        };
        for record in in_flight {
            let Some(_lock) = self.locks.try_acquire(record.sale_id) else {
                continue;
            };
            let (sale_id, operation) = (record.sale_id, record.operation);
            tracing::info!(%sale_id, %operation, state = %record.state, "resuming interrupted saga");
            match self.resume(record).await {
                Ok(_) | Err(SagaError::StockConflict { .. }) => report.resumed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(%sale_id, %operation, error = %e, "could not resume saga");
                }
            }
        }

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.orphan_grace)
                .unwrap_or(chrono::Duration::zero());
        let pending = match self
            .list_sales(&SaleFilter::with_status(SaleStatus::Pending))
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                report.failed += 1;
                tracing::warn!(error = %e, "could not list pending sales, skipping adoption");
                Vec::new()
            }
        };
        for sale in pending.into_iter().filter(|s| s.created_at < cutoff) {
            let Some(_lock) = self.locks.try_acquire(sale.id) else {
                continue;
            };
            let sale_id = sale.id;
            let record = match self.store.get_saga(sale_id, SagaOperation::Create).await {
                Ok(record) => record,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(%sale_id, error = %e, "could not load saga for pending sale");
                    continue;
                }
            };
            match record {
                None => {
                    tracing::info!(%sale_id, "adopting pending sale with no saga record");
                    match self.adopt(sale).await {
                        Ok(_) | Err(SagaError::StockConflict { .. }) => report.adopted += 1,
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(%sale_id, error = %e, "could not adopt pending sale");
                        }
                    }
                }
                Some(record) if aborted_create(&record) => {
                    match self.finish_aborted_create(sale_id).await {
                        Ok(_) => report.repaired += 1,
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(%sale_id, error = %e, "could not cancel conflicted sale");
                        }
                    }
                }
                Some(_) => {}
            }
        }

        tracing::info!(
            resumed = report.resumed,
            adopted = report.adopted,
            repaired = report.repaired,
            failed = report.failed,
            "recovery finished"
        );
        Ok(report)
    }

    async fn resume(&self, record: SagaRecord) -> Result<SaleReceipt> {
        let sale = self.load_sale(record.sale_id).await?;
        match record.operation {
            SagaOperation::Create => self.drive_create(sale, record).await,
            SagaOperation::Cancel => self.drive_cancel(sale, record).await,
        }
    }

    async fn adopt(&self, sale: Sale) -> Result<SaleReceipt> {
        let mut record = SagaRecord::begin(sale.id, SagaOperation::Create);
        record.version = self.store.begin_saga(&record).await?;
        self.drive_create(sale, record).await
    }

    /// Makes one attempt at every open reconciliation entry.
    ///
    /// Entries whose sale is locked by a running saga are skipped until the
    /// next pass.
    #[tracing::instrument(skip_all)]
    pub async fn reconcile_due(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for entry in self.queue.list(Some(ReconciliationStatus::Open)).await? {
            let Some(_lock) = self.locks.try_acquire(entry.sale_id) else {
                report.skipped += 1;
                continue;
            };
            report.attempted += 1;
            let (sale_id, operation) = (entry.sale_id, entry.operation);
            match self.reconcile_entry(entry).await {
                Ok(entry) if entry.is_resolved() => report.resolved += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(%sale_id, %operation, error = %e, "reconciliation attempt errored");
                }
            }
        }

        Ok(report)
    }

    /// Forces one reconciliation attempt, whatever the entry's status.
    #[tracing::instrument(skip_all, fields(%sale_id, %operation))]
    pub async fn retry_now(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<ReconciliationEntry> {
        let Some(_lock) = self
            .locks
            .acquire_timeout(sale_id, self.config.lock_timeout)
            .await
        else {
            return Err(SagaError::InvalidState {
                sale_id,
                reason: "another saga is still running for this sale".into(),
            });
        };

        let mut entry = self
            .queue
            .get(sale_id, operation)
            .await?
            .ok_or(SagaError::ReconciliationNotFound { sale_id, operation })?;
        if entry.is_resolved() {
            return Ok(entry);
        }
        entry.status = ReconciliationStatus::Open;
        self.reconcile_entry(entry).await
    }

    /// Records that an operator fixed the inventory by hand, and moves the
    /// sale to its target status without touching inventory. `note` is kept
    /// on the entry.
    #[tracing::instrument(skip_all, fields(%sale_id, %operation, %resolved_by))]
    pub async fn resolve_manually(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
        resolved_by: &str,
        note: Option<&str>,
    ) -> Result<ReconciliationEntry> {
        let Some(_lock) = self
            .locks
            .acquire_timeout(sale_id, self.config.lock_timeout)
            .await
        else {
            return Err(SagaError::InvalidState {
                sale_id,
                reason: "another saga is still running for this sale".into(),
            });
        };

        let mut entry = self
            .queue
            .get(sale_id, operation)
            .await?
            .ok_or(SagaError::ReconciliationNotFound { sale_id, operation })?;
        if entry.is_resolved() {
            return Ok(entry);
        }

        let mut record = self
            .store
            .get_saga(sale_id, operation)
            .await?
            .ok_or(StoreError::NotFound { sale_id, operation })?;

        if aborted_create(&record) {
            self.set_status("ledger_resolve", sale_id, SaleStatus::Cancelled)
                .await?;
        } else {
            self.set_status("ledger_resolve", sale_id, target_status(operation))
                .await?;
            if record.state != operation.target_state() {
                advance(&mut record, operation.target_state())?;
                self.save(&mut record).await?;
            }
        }

        entry.resolve(resolved_by, note);
        self.queue.update(&entry).await?;
        metrics::counter!("reconciliation_attempts_total", "outcome" => "operator").increment(1);
        tracing::info!("reconciliation resolved by operator");
        Ok(entry)
    }

    #[tracing::instrument(skip_all, fields(sale_id = %entry.sale_id, operation = %entry.operation, attempt = entry.attempts + 1))]
    async fn reconcile_entry(&self, mut entry: ReconciliationEntry) -> Result<ReconciliationEntry> {
        let (sale_id, operation) = (entry.sale_id, entry.operation);

        let Some(mut record) = self.store.get_saga(sale_id, operation).await? else {
            entry.require_manual_action("saga record is missing");
            self.queue.update(&entry).await?;
            return Ok(entry);
        };

        if record.state == operation.target_state() {
            entry.resolve(RECONCILER, None);
            self.queue.update(&entry).await?;
            return Ok(entry);
        }
        let aborted = aborted_create(&record);
        if !aborted && record.state != SagaState::StockSyncPending {
            tracing::debug!(state = %record.state, "saga not awaiting reconciliation yet");
            return Ok(entry);
        }

        let attempt = if aborted {
            self.set_status("ledger_cancel", sale_id, SaleStatus::Cancelled)
                .await
        } else {
            self.converge(sale_id, operation).await
        };
        match attempt {
            Ok(sale) => {
                if !aborted {
                    advance(&mut record, operation.target_state())?;
                    self.save(&mut record).await?;
                }
                entry.resolve(RECONCILER, None);
                metrics::counter!("reconciliation_attempts_total", "outcome" => "resolved")
                    .increment(1);
                tracing::info!(status = %sale.status, "reconciliation converged");
            }
            Err(e) if e.is_transient() => {
                entry.record_failure(e.to_string(), self.config.reconcile_max_attempts);
                let outcome = if entry.status == ReconciliationStatus::ManualActionRequired {
                    "manual"
                } else {
                    "failed"
                };
                metrics::counter!("reconciliation_attempts_total", "outcome" => outcome)
                    .increment(1);
                tracing::warn!(error = %e, attempts = entry.attempts, "reconciliation attempt failed");
            }
            Err(e @ (SagaError::Store(_) | SagaError::Serialization(_))) => return Err(e),
            Err(e) => {
                entry.require_manual_action(e.to_string());
                metrics::counter!("reconciliation_attempts_total", "outcome" => "manual")
                    .increment(1);
                tracing::error!(error = %e, "reconciliation needs an operator");
            }
        }

        self.queue.update(&entry).await?;
        Ok(entry)
    }

    /// Finishes the inventory leg, then moves the ledger to the target status.
    async fn converge(&self, sale_id: SaleId, operation: SagaOperation) -> Result<Sale> {
        let sale = self.load_sale(sale_id).await?;
        self.commit_inventory(&sale, operation).await.result?;
        self.set_status("ledger_reconcile", sale_id, target_status(operation))
            .await
    }
}

impl<S, I, L> SaleCoordinator<S, I, L>
where
    S: SagaStore + Clone + 'static,
    I: InventoryService + Clone + 'static,
    L: LedgerService + 'static,
{
    /// Runs [`Self::create_sale`] on its own task so a dropped caller does
    /// not abandon the saga halfway.
    pub fn spawn_create(self: &Arc<Self>, request: CreateSaleRequest) -> JoinHandle<Result<SaleReceipt>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.create_sale(request).await })
    }

    /// Runs [`Self::cancel_sale`] on its own task.
    pub fn spawn_cancel(self: &Arc<Self>, sale_id: SaleId) -> JoinHandle<Result<SaleReceipt>> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.cancel_sale(sale_id).await })
    }
}
