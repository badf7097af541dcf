//! HTTP route handlers.

pub mod observability;
pub mod reconciliation;
pub mod sales;

use common::SaleId;
use saga_store::SagaOperation;

use crate::error::ApiError;

fn parse_sale_id(id: &str) -> Result<SaleId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid sale id: {e}")))?;
    Ok(SaleId::from_uuid(uuid))
}

fn parse_operation(operation: &str) -> Result<SagaOperation, ApiError> {
    operation
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Unknown operation '{operation}'")))
}
