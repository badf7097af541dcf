//! Reconciliation queue and its background worker.

use std::sync::Arc;
use std::time::Duration;

use saga_store::{ReconciliationEntry, ReconciliationStatus, SaleId, SagaOperation, SagaStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::coordinator::SaleCoordinator;
use crate::error::Result;
use crate::services::{InventoryService, LedgerService};

/// Durable list of sagas that could not converge on their own.
///
/// Entries are unique per `(sale_id, operation)`; enqueueing the same saga
/// twice leaves the first entry untouched.
#[derive(Clone)]
pub struct ReconciliationQueue<S> {
    store: S,
}

impl<S: SagaStore> ReconciliationQueue<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Adds an entry. Returns false if the saga was already queued.
    #[tracing::instrument(skip_all, fields(sale_id = %entry.sale_id, operation = %entry.operation))]
    pub async fn enqueue(&self, entry: ReconciliationEntry) -> Result<bool> {
        let added = self.store.enqueue_reconciliation(&entry).await?;
        if added {
            tracing::warn!(status = %entry.status, last_error = ?entry.last_error, "saga queued for reconciliation");
        } else {
            tracing::debug!("saga already queued for reconciliation");
        }
        self.refresh_gauge().await?;
        Ok(added)
    }

    pub async fn get(
        &self,
        sale_id: SaleId,
        operation: SagaOperation,
    ) -> Result<Option<ReconciliationEntry>> {
        Ok(self.store.get_reconciliation(sale_id, operation).await?)
    }

    pub async fn update(&self, entry: &ReconciliationEntry) -> Result<()> {
        self.store.update_reconciliation(entry).await?;
        self.refresh_gauge().await
    }

    /// Lists entries oldest first, optionally by status.
    pub async fn list(
        &self,
        status: Option<ReconciliationStatus>,
    ) -> Result<Vec<ReconciliationEntry>> {
        Ok(self.store.list_reconciliation(status).await?)
    }

    /// Number of entries the worker will pick up on its next pass.
    pub async fn open_count(&self) -> Result<usize> {
        Ok(self.list(Some(ReconciliationStatus::Open)).await?.len())
    }

    async fn refresh_gauge(&self) -> Result<()> {
        let open = self.open_count().await?;
        metrics::gauge!("reconciliation_open_entries").set(open as f64);
        Ok(())
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Entries skipped because a saga for the same sale was running.
    pub skipped: usize,
}

/// Periodically drives open reconciliation entries through the coordinator.
pub struct ReconciliationWorker;

impl ReconciliationWorker {
    /// Spawns the worker loop. It runs one pass per `interval` until
    /// `shutdown` flips to true or its sender is dropped.
    pub fn spawn<S, I, L>(
        coordinator: Arc<SaleCoordinator<S, I, L>>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        S: SagaStore + Clone + 'static,
        I: InventoryService + Clone + 'static,
        L: LedgerService + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = interval.as_secs_f64(), "reconciliation worker started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match coordinator.reconcile_due().await {
                            Ok(report) if report.attempted > 0 => {
                                tracing::info!(
                                    attempted = report.attempted,
                                    resolved = report.resolved,
                                    failed = report.failed,
                                    skipped = report.skipped,
                                    "reconciliation pass finished"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "reconciliation pass failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("reconciliation worker stopped");
        })
    }
}
