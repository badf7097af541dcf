//! Liveness and Prometheus scrape endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::SagaStore;
use serde::Serialize;

use crate::routes::sales::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Open reconciliation entries; `None` if the saga store is unreachable.
    pub reconciliation_backlog: Option<usize>,
}

/// GET /health: `ok`, or `degraded` when the saga store cannot be read.
pub async fn health<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.coordinator.queue().open_count().await {
        Ok(backlog) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                reconciliation_backlog: Some(backlog),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read the saga store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    reconciliation_backlog: None,
                }),
            )
        }
    }
}

/// GET /metrics
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
