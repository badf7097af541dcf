//! Sale creation, cancellation, and read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use domain::{CartLine, Sale, SaleFilter};
use saga::{CartPreview, CreateSaleRequest, InventoryService, LedgerService, SaleCoordinator, SaleReceipt};
use saga_store::{SagaRecord, SagaStore};
use serde::Deserialize;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::parse_sale_id;

/// Header carrying the client's idempotency key for `POST /sales`.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Coordinator wired to type-erased downstream services, so one binary can
/// run against HTTP or in-memory backends.
pub type Coordinator<S> = SaleCoordinator<S, Arc<dyn InventoryService>, Arc<dyn LedgerService>>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore> {
    pub coordinator: Arc<Coordinator<S>>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub lines: Vec<CartLine>,
}

/// POST /sales: validate the cart and run the create saga.
///
/// A retried request with the same `Idempotency-Key` returns the original
/// sale with `replayed: true`.
#[tracing::instrument(skip_all)]
pub async fn create<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(mut req): Json<CreateSaleRequest>,
) -> Result<(StatusCode, Json<SaleReceipt>), ApiError> {
    if let Some(key) = idempotency_key(&headers)? {
        req.request_id = Some(key);
    }

    let receipt = state
        .coordinator
        .spawn_create(req)
        .await
        .map_err(join_error)??;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /sales/preview: price and trim a cart without touching anything.
#[tracing::instrument(skip_all)]
pub async fn preview<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<CartPreview>, ApiError> {
    Ok(Json(state.coordinator.preview(req.lines).await?))
}

/// GET /sales: list sales from the ledger, optionally filtered.
#[tracing::instrument(skip(state))]
pub async fn list<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(filter): Query<SaleFilter>,
) -> Result<Json<Vec<Sale>>, ApiError> {
    Ok(Json(state.coordinator.list_sales(&filter).await?))
}

/// GET /sales/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Sale>, ApiError> {
    let sale_id = parse_sale_id(&id)?;
    Ok(Json(state.coordinator.get_sale(sale_id).await?))
}

/// POST /sales/{id}/cancel: run the cancel saga and return the stock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SaleReceipt>, ApiError> {
    let sale_id = parse_sale_id(&id)?;
    let receipt = state
        .coordinator
        .spawn_cancel(sale_id)
        .await
        .map_err(join_error)??;
    Ok(Json(receipt))
}

/// GET /sales/{id}/sagas: coordinator records for a sale.
#[tracing::instrument(skip(state))]
pub async fn sagas<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SagaRecord>>, ApiError> {
    let sale_id = parse_sale_id(&id)?;
    let records = state.coordinator.sagas_for_sale(sale_id).await?;
    if records.is_empty() {
        // Distinguish "no sagas yet" from "no such sale".
        state.coordinator.get_sale(sale_id).await?;
    }
    Ok(Json(records))
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| ApiError::BadRequest("Idempotency-Key must be a UUID".to_string()))?;
    Ok(Some(key))
}

fn join_error(err: JoinError) -> ApiError {
    ApiError::Internal(format!("saga task failed: {err}"))
}
