//! Saga records and cached idempotency outcomes.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SaleId, SagaState, StoreError};

/// Which saga a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaOperation {
    Create,
    Cancel,
}

impl SagaOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaOperation::Create => "create",
            SagaOperation::Cancel => "cancel",
        }
    }

    /// The state a freshly begun saga of this kind starts in.
    pub fn initial_state(&self) -> SagaState {
        match self {
            SagaOperation::Create => SagaState::StockCommitting,
            SagaOperation::Cancel => SagaState::CancelCommitting,
        }
    }

    /// The state a successful saga of this kind ends in.
    pub fn target_state(&self) -> SagaState {
        match self {
            SagaOperation::Create => SagaState::Completed,
            SagaOperation::Cancel => SagaState::Cancelled,
        }
    }

    /// Idempotency key for this operation's inventory mutation on `sale_id`.
    pub fn idempotency_key(&self, sale_id: SaleId) -> String {
        format!("{sale_id}-{}", self.as_str())
    }
}

impl std::fmt::Display for SagaOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SagaOperation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SagaOperation::Create),
            "cancel" => Ok(SagaOperation::Cancel),
            other => Err(StoreError::Decode(format!("unknown saga operation '{other}'"))),
        }
    }
}

/// Durable progress of one saga over one sale.
///
/// Written before the saga touches inventory, so a restart can tell which
/// step was in flight. `version` is bumped by the store on every update and
/// guards against two writers racing on the same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub sale_id: SaleId,
    pub operation: SagaOperation,
    pub idempotency_key: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub state: SagaState,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    /// Starts a record for `operation` on `sale_id` in the operation's initial state.
    pub fn begin(sale_id: SaleId, operation: SagaOperation) -> Self {
        let now = Utc::now();
        Self {
            sale_id,
            operation,
            idempotency_key: operation.idempotency_key(sale_id),
            attempt_count: 0,
            last_error: None,
            state: operation.initial_state(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the record to `next`, refusing moves the state machine forbids.
    pub fn transition(&mut self, next: SagaState) -> Result<(), SagaState> {
        if !self.state.can_transition_to(next) {
            return Err(self.state);
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Adds `attempts` to the running count and remembers the last failure.
    pub fn record_attempts(&mut self, attempts: u32, error: Option<String>) {
        self.attempt_count = self.attempt_count.saturating_add(attempts);
        if error.is_some() {
            self.last_error = error;
        }
        self.updated_at = Utc::now();
    }
}

/// Cached terminal outcome of an inventory mutation.
///
/// `outcome` holds the serialized result exactly as the guard will replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub key: String,
    pub sale_id: SaleId,
    pub operation: SagaOperation,
    pub outcome: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    pub fn new(sale_id: SaleId, operation: SagaOperation, outcome: serde_json::Value) -> Self {
        Self {
            key: operation.idempotency_key(sale_id),
            sale_id,
            operation,
            outcome,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_sale_plus_operation() {
        let sale_id = SaleId::new();
        assert_eq!(
            SagaOperation::Create.idempotency_key(sale_id),
            format!("{sale_id}-create")
        );
        assert_ne!(
            SagaOperation::Create.idempotency_key(sale_id),
            SagaOperation::Cancel.idempotency_key(sale_id)
        );
    }

    #[test]
    fn test_begin_uses_operation_initial_state() {
        let create = SagaRecord::begin(SaleId::new(), SagaOperation::Create);
        assert_eq!(create.state, SagaState::StockCommitting);
        assert_eq!(create.version, 0);

        let cancel = SagaRecord::begin(SaleId::new(), SagaOperation::Cancel);
        assert_eq!(cancel.state, SagaState::CancelCommitting);
    }

    #[test]
    fn test_begin_never_stores_pending_validation() {
        for operation in [SagaOperation::Create, SagaOperation::Cancel] {
            let record = SagaRecord::begin(SaleId::new(), operation);
            assert_ne!(record.state, SagaState::PendingValidation);
            assert!(record.state.is_in_flight());
        }
    }

    #[test]
    fn test_transition_rejects_illegal_moves() {
        let mut record = SagaRecord::begin(SaleId::new(), SagaOperation::Create);
        record.transition(SagaState::StockSyncPending).unwrap();
        assert_eq!(
            record.transition(SagaState::CancelCommitting),
            Err(SagaState::StockSyncPending)
        );
        record.transition(SagaState::Completed).unwrap();
        assert_eq!(record.state, SagaState::Completed);
    }

    #[test]
    fn test_record_attempts_keeps_last_error() {
        let mut record = SagaRecord::begin(SaleId::new(), SagaOperation::Create);
        record.record_attempts(3, Some("timeout".into()));
        record.record_attempts(1, None);
        assert_eq!(record.attempt_count, 4);
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("cancel".parse::<SagaOperation>().unwrap(), SagaOperation::Cancel);
        assert!(matches!(
            "refund".parse::<SagaOperation>(),
            Err(StoreError::Decode(_))
        ));
    }
}
