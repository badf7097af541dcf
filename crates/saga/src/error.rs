//! Saga error types.

use common::SaleId;
use domain::{DomainError, ProductId};
use saga_store::StoreError;
use thiserror::Error;

use crate::services::ServiceError;

/// Errors returned by the coordinator and its components.
///
/// Running out of retries on the inventory leg is deliberately absent: that
/// outcome is a successful receipt with `stock_sync_pending` set.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The cart is malformed; nothing was touched.
    #[error("Validation error: {0}")]
    Validation(#[from] DomainError),

    /// A cart line names a product the inventory does not know.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Stock was short when the cart was validated.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// Stock ran out between validation and the decrement; the sale was cancelled.
    #[error(
        "Stock conflict on {product_id} for sale {sale_id}: available {available}, requested {requested}; sale cancelled"
    )]
    StockConflict {
        sale_id: SaleId,
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// A single service call failed.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// A step with nothing to compensate ran out of retries.
    #[error("Step '{step}' failed after {attempts} attempts: {reason}")]
    TransientService {
        step: &'static str,
        attempts: u32,
        reason: String,
    },

    /// The sale is not in a state that allows the requested operation.
    #[error("Invalid state for sale {sale_id}: {reason}")]
    InvalidState { sale_id: SaleId, reason: String },

    /// No sale with this id.
    #[error("Sale not found: {0}")]
    SaleNotFound(SaleId),

    /// No reconciliation entry for this sale and operation.
    #[error("No reconciliation entry for {operation} saga of sale {sale_id}")]
    ReconciliationNotFound {
        sale_id: SaleId,
        operation: saga_store::SagaOperation,
    },

    /// Coordinator state could not be read or written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A cached outcome could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if the failure may go away on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Service(e) => e.is_transient(),
            SagaError::TransientService { .. } => true,
            _ => false,
        }
    }

    /// Wraps a service failure left over after retries ran out.
    pub(crate) fn exhausted(step: &'static str, attempts: u32, err: ServiceError) -> Self {
        match err {
            ServiceError::SaleNotFound(id) => SagaError::SaleNotFound(id),
            e if e.is_transient() => SagaError::TransientService {
                step,
                attempts,
                reason: e.to_string(),
            },
            e => SagaError::Service(e),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_transient_becomes_transient_service() {
        let err = SagaError::exhausted(
            "ledger_create",
            3,
            ServiceError::Timeout { after_ms: 5000 },
        );
        assert!(matches!(
            err,
            SagaError::TransientService {
                step: "ledger_create",
                attempts: 3,
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_exhausted_keeps_terminal_errors() {
        let id = SaleId::new();
        assert!(matches!(
            SagaError::exhausted("ledger_get", 1, ServiceError::SaleNotFound(id)),
            SagaError::SaleNotFound(found) if found == id
        ));
        assert!(matches!(
            SagaError::exhausted("ledger_get", 1, ServiceError::Rejected("no".into())),
            SagaError::Service(ServiceError::Rejected(_))
        ));
    }
}
