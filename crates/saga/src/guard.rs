//! Idempotency guard around inventory mutations.

use std::future::Future;

use saga_store::{IdempotencyEntry, SaleId, SagaOperation, SagaStore};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Result, SagaError};
use crate::services::ServiceError;

/// Replays the cached terminal outcome of an inventory mutation instead of
/// invoking it again.
///
/// Outcomes are keyed by `sale_id + operation` and live in the saga store, so
/// they survive restarts and are never purged. Successes and non-transient
/// failures are cached; transient failures are not, so a retry reaches the
/// service again.
#[derive(Clone)]
pub struct IdempotencyGuard<S> {
    store: S,
}

impl<S: SagaStore> IdempotencyGuard<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Runs `op` once per `(sale_id, operation)`.
    #[tracing::instrument(skip_all, fields(%sale_id, %operation))]
    pub async fn apply<T, F, Fut>(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
        op: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        if let Some(cached) = self.cached::<T>(sale_id, operation).await? {
            metrics::counter!("idempotency_cache_hits_total").increment(1);
            tracing::debug!("replaying cached inventory outcome");
            return cached.map_err(SagaError::from);
        }

        let result = op().await;

        let terminal = match &result {
            Ok(_) => true,
            Err(e) => !e.is_transient(),
        };
        if terminal {
            let outcome = serde_json::to_value(&result)?;
            self.store
                .put_outcome(&IdempotencyEntry::new(sale_id, operation, outcome))
                .await?;
        }

        result.map_err(SagaError::from)
    }

    /// Returns the cached outcome for `(sale_id, operation)`, if one exists.
    pub async fn cached<T: DeserializeOwned>(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<std::result::Result<T, ServiceError>>> {
        let key = operation.idempotency_key(sale_id);
        match self.store.get_outcome(&key).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.outcome)?)),
            None => Ok(None),
        }
    }
}
