//! Sale status lifecycle.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The status of a sale as recorded by the Sale Ledger Service.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Completed ──► Cancelled
///           ├──► Cancelled            ▲
///           └──► StockSyncPending ────┤
///                      │              │
///                      └──► Completed ┘
/// Completed | Cancelled ──► StockSyncPending (inventory leg failed after the ledger leg)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Recorded in the ledger, inventory decrement not yet confirmed.
    #[default]
    Pending,

    /// Inventory decrement confirmed.
    Completed,

    /// Cancelled; stock restored or never taken. Terminal unless the
    /// compensating increment is still owed.
    Cancelled,

    /// The inventory leg failed after the ledger leg succeeded. Cleared only
    /// by reconciliation or an operator.
    StockSyncPending,
}

impl SaleStatus {
    /// Returns true if a cancellation may start from this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, SaleStatus::Completed)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Cancelled)
    }

    /// Returns true if the ledger may move a sale from `self` to `next`.
    pub fn can_transition_to(&self, next: SaleStatus) -> bool {
        use SaleStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Pending, Completed | Cancelled | StockSyncPending) => true,
            (Completed, Cancelled | StockSyncPending) => true,
            (Cancelled, StockSyncPending) => true,
            (StockSyncPending, Completed | Cancelled) => true,
            _ => false,
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
            SaleStatus::StockSyncPending => "stock_sync_pending",
        }
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SaleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SaleStatus::Pending),
            "completed" => Ok(SaleStatus::Completed),
            "cancelled" => Ok(SaleStatus::Cancelled),
            "stock_sync_pending" => Ok(SaleStatus::StockSyncPending),
            other => Err(format!("unknown sale status '{other}'")),
        }
    }
}
