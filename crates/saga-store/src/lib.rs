//! Durable state owned by the sale transaction coordinator.
//!
//! Three collections survive a coordinator restart:
//! - saga records, one per `(sale_id, operation)`, with at most one active per sale
//! - idempotency outcomes, the cached terminal result of each inventory mutation
//! - reconciliation entries, sagas that could not converge automatically

pub mod error;
pub mod memory;
pub mod postgres;
pub mod reconciliation;
pub mod record;
pub mod state;
pub mod store;

pub use common::SaleId;
pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use reconciliation::{ReconciliationEntry, ReconciliationStatus};
pub use record::{IdempotencyEntry, SagaOperation, SagaRecord};
pub use state::SagaState;
pub use store::{SagaStore, SagaStoreExt};
