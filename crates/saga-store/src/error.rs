use thiserror::Error;

use crate::{SaleId, SagaOperation};

/// Errors that can occur when reading or writing coordinator state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another saga for this sale is still active.
    #[error("Sale {sale_id} already has an active {active} saga")]
    SagaAlreadyActive {
        sale_id: SaleId,
        active: SagaOperation,
    },

    /// A saga record for this sale and operation already exists.
    #[error("A {operation} saga already exists for sale {sale_id}")]
    DuplicateSaga {
        sale_id: SaleId,
        operation: SagaOperation,
    },

    /// The record changed since it was read.
    #[error(
        "Concurrency conflict for {operation} saga of sale {sale_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        sale_id: SaleId,
        operation: SagaOperation,
        expected: i64,
        actual: i64,
    },

    /// The requested record does not exist.
    #[error("No {operation} record for sale {sale_id}")]
    NotFound {
        sale_id: SaleId,
        operation: SagaOperation,
    },

    /// A stored value could not be decoded.
    #[error("Corrupt stored value: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
