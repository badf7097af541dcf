//! Reconciliation queue entries.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SaleId, SagaOperation, StoreError};

/// Where an entry stands in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Picked up by the background worker on every pass.
    Open,
    /// Automatic retries gave up; waits for an operator.
    ManualActionRequired,
    /// Converged, by retry or by operator override.
    Resolved,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Open => "open",
            ReconciliationStatus::ManualActionRequired => "manual_action_required",
            ReconciliationStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconciliationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ReconciliationStatus::Open),
            "manual_action_required" => Ok(ReconciliationStatus::ManualActionRequired),
            "resolved" => Ok(ReconciliationStatus::Resolved),
            other => Err(StoreError::Decode(format!(
                "unknown reconciliation status '{other}'"
            ))),
        }
    }
}

/// A saga that could not converge on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub sale_id: SaleId,
    pub operation: SagaOperation,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: ReconciliationStatus,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    /// Free-text remark left by whoever resolved the entry.
    #[serde(default)]
    pub note: Option<String>,
}

impl ReconciliationEntry {
    pub fn new(sale_id: SaleId, operation: SagaOperation, last_error: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            sale_id,
            operation,
            attempts: 0,
            last_error,
            status: ReconciliationStatus::Open,
            enqueued_at: now,
            updated_at: now,
            resolved_at: None,
            resolved_by: None,
            note: None,
        }
    }

    /// Records a failed reconciliation attempt. Once `max_attempts` is
    /// reached the entry is parked for an operator.
    pub fn record_failure(&mut self, error: impl Into<String>, max_attempts: u32) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
        if self.attempts >= max_attempts {
            self.status = ReconciliationStatus::ManualActionRequired;
        }
    }

    /// Parks the entry for an operator regardless of the attempt count.
    pub fn require_manual_action(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.status = ReconciliationStatus::ManualActionRequired;
        self.updated_at = Utc::now();
    }

    pub fn resolve(&mut self, resolved_by: impl Into<String>, note: Option<&str>) {
        let now = Utc::now();
        self.status = ReconciliationStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolved_by = Some(resolved_by.into());
        self.note = note.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
        self.updated_at = now;
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ReconciliationStatus::Resolved
    }
}
