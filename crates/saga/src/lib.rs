//! Sale transaction coordinator.
//!
//! A sale touches two services that share no transaction: the Sale Ledger
//! Service records it and the Inventory Service takes its stock. This crate
//! keeps the two consistent:
//! 1. Validate the cart against current stock and prices
//! 2. Record the sale as pending in the ledger
//! 3. Decrement stock through an idempotency guard, with bounded retries
//! 4. Mark the sale completed
//!
//! Cancellation runs the reverse saga and returns the stock. When an
//! inventory leg cannot finish, the sale is flagged `stock_sync_pending` and
//! the reconciliation queue owns it until it converges.

pub mod coordinator;
pub mod error;
pub mod guard;
pub mod lock;
pub mod reconciliation;
pub mod retry;
pub mod services;
pub mod validator;

pub use coordinator::{
    CoordinatorConfig, CreateSaleRequest, RECONCILER, RecoveryReport, SaleCoordinator,
    SaleReceipt,
};
pub use error::{Result, SagaError};
pub use guard::IdempotencyGuard;
pub use lock::{SaleLockGuard, SaleLocks};
pub use reconciliation::{ReconcileReport, ReconciliationQueue, ReconciliationWorker};
pub use retry::{RetryOutcome, RetryPolicy, Retryable};
pub use services::{
    HttpInventoryService, HttpLedgerService, InMemoryInventoryService, InMemoryLedgerService,
    InventoryService, LedgerService, ServiceError, StockLevel,
};
pub use validator::{CartPreview, PreviewLine, StockValidator};
