//! Saga state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The state of a sale's saga.
///
/// State transitions:
/// ```text
/// (PendingValidation) ═► StockCommitting ──┬──► Completed ──► CancelCommitting ──┬──► Cancelled
///                                          ├──► Cancelled (commit-time conflict) │
///                                          └──► StockSyncPending ◄───────────────┘
/// StockSyncPending ──► Completed | Cancelled   (reconciliation or operator only)
/// ```
///
/// `PendingValidation` covers the cart check, before the sale or its saga
/// record exist. A record is only created once the ledger holds the sale, so
/// [`SagaRecord::begin`](crate::SagaRecord::begin) is the `═►` step and no
/// stored record is ever in `PendingValidation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    /// Cart is being checked; nothing exists in the ledger yet. Never stored.
    PendingValidation,

    /// Sale is pending in the ledger; the inventory decrement is in progress.
    StockCommitting,

    /// Decrement confirmed and the sale marked completed.
    Completed,

    /// Sale marked cancelled in the ledger; the compensating increment is in progress.
    CancelCommitting,

    /// Sale cancelled and its stock restored, or never taken (terminal state).
    Cancelled,

    /// Inventory leg exhausted its retries; owned by the reconciliation queue.
    StockSyncPending,
}

impl SagaState {
    /// Returns true if the saga holds the sale's mutual-exclusion slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SagaState::StockCommitting | SagaState::CancelCommitting | SagaState::StockSyncPending
        )
    }

    /// Returns true if the coordinator is mid-step and a restart must resume it.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SagaState::StockCommitting | SagaState::CancelCommitting)
    }

    /// Returns true if this is a terminal state.
    ///
    /// `Completed` is terminal for the create saga; a cancellation starts a
    /// separate record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Cancelled)
    }

    /// Returns true if a stored record may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (self, next),
            (StockCommitting, Completed | Cancelled | StockSyncPending)
                | (Completed, CancelCommitting)
                | (CancelCommitting, Cancelled | StockSyncPending)
                | (StockSyncPending, Completed | Cancelled)
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::PendingValidation => "pending_validation",
            SagaState::StockCommitting => "stock_committing",
            SagaState::Completed => "completed",
            SagaState::CancelCommitting => "cancel_committing",
            SagaState::Cancelled => "cancelled",
            SagaState::StockSyncPending => "stock_sync_pending",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SagaState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_validation" => Ok(SagaState::PendingValidation),
            "stock_committing" => Ok(SagaState::StockCommitting),
            "completed" => Ok(SagaState::Completed),
            "cancel_committing" => Ok(SagaState::CancelCommitting),
            "cancelled" => Ok(SagaState::Cancelled),
            "stock_sync_pending" => Ok(SagaState::StockSyncPending),
            other => Err(StoreError::Decode(format!("unknown saga state '{other}'"))),
        }
    }
}
