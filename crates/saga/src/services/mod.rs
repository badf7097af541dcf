//! External collaborators: the Inventory Service and the Sale Ledger Service.
//!
//! Each has a trait, an in-memory implementation used by tests and the demo
//! binary, and an HTTP adapter in [`http`].

pub mod http;
pub mod inventory;
pub mod ledger;

use common::SaleId;
use domain::ProductId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{HttpInventoryService, HttpLedgerService};
pub use inventory::{InMemoryInventoryService, InventoryService, StockLevel};
pub use ledger::{InMemoryLedgerService, LedgerService};

/// Failure reported by (or while talking to) an external service.
///
/// Serializable so that terminal outcomes can be cached by the idempotency
/// guard and replayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceError {
    /// The inventory could not cover a decrement.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// The ledger has no sale with this id.
    #[error("Sale not found: {0}")]
    SaleNotFound(SaleId),

    /// The service failed in a way that may succeed on retry.
    #[error("Transient service failure: {0}")]
    Transient(String),

    /// The call did not complete within the step timeout.
    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The service refused the request; retrying will not help.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Returns true if the failure is eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_) | ServiceError::Timeout { .. })
    }
}
