//! Reconciliation queue endpoints for operators.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use saga_store::{ReconciliationEntry, ReconciliationStatus, SagaStore};
use serde::Deserialize;

use crate::error::ApiError;
use crate::routes::sales::AppState;
use crate::routes::{parse_operation, parse_sale_id};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub resolved_by: String,
    pub note: Option<String>,
}

/// GET /reconciliation: queue entries, optionally filtered by `?status=`.
#[tracing::instrument(skip(state))]
pub async fn list<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ReconciliationEntry>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<ReconciliationStatus>()
                .map_err(|_| ApiError::BadRequest(format!("Unknown reconciliation status '{s}'")))
        })
        .transpose()?;

    Ok(Json(state.coordinator.queue().list(status).await?))
}

/// POST /reconciliation/{sale_id}/{operation}/retry: one attempt now,
/// including for entries parked for manual action.
#[tracing::instrument(skip(state))]
pub async fn retry<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((sale_id, operation)): Path<(String, String)>,
) -> Result<Json<ReconciliationEntry>, ApiError> {
    let sale_id = parse_sale_id(&sale_id)?;
    let operation = parse_operation(&operation)?;
    Ok(Json(state.coordinator.retry_now(sale_id, operation).await?))
}

/// POST /reconciliation/{sale_id}/{operation}/resolve: an operator fixed
/// the stock by hand.
#[tracing::instrument(skip(state, req))]
pub async fn resolve<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((sale_id, operation)): Path<(String, String)>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ReconciliationEntry>, ApiError> {
    let sale_id = parse_sale_id(&sale_id)?;
    let operation = parse_operation(&operation)?;
    let resolved_by = req.resolved_by.trim();
    if resolved_by.is_empty() {
        return Err(ApiError::BadRequest("resolved_by is required".to_string()));
    }
    Ok(Json(
        state
            .coordinator
            .resolve_manually(sale_id, operation, resolved_by, req.note.as_deref())
            .await?,
    ))
}
