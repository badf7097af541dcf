//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{SagaError, ServiceError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Coordinator error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Saga(err) => saga_error_to_response(&err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, code, "request failed");
        }

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: &SagaError) -> (StatusCode, &'static str, String) {
    let (status, code) = match err {
        SagaError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        SagaError::ProductNotFound(_) => (StatusCode::UNPROCESSABLE_ENTITY, "product_not_found"),
        SagaError::InsufficientStock { .. } => (StatusCode::CONFLICT, "insufficient_stock"),
        SagaError::StockConflict { .. } => (StatusCode::CONFLICT, "stock_conflict"),
        SagaError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
        SagaError::SaleNotFound(_) => (StatusCode::NOT_FOUND, "sale_not_found"),
        SagaError::ReconciliationNotFound { .. } => {
            (StatusCode::NOT_FOUND, "reconciliation_not_found")
        }
        SagaError::TransientService { .. } => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
        SagaError::Service(service) => match service {
            ServiceError::SaleNotFound(_) => (StatusCode::NOT_FOUND, "sale_not_found"),
            ServiceError::InsufficientStock { .. } => (StatusCode::CONFLICT, "insufficient_stock"),
            ServiceError::Rejected(_) => (StatusCode::BAD_GATEWAY, "upstream_rejected"),
            ServiceError::Transient(_) | ServiceError::Timeout { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
        },
        SagaError::Store(_) | SagaError::Serialization(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    };
    (status, code, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
