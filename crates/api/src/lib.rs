//! HTTP API for the sale transaction coordinator.
//!
//! Provides REST endpoints for creating and cancelling sales and for
//! operating the reconciliation queue, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    CoordinatorConfig, HttpInventoryService, HttpLedgerService, InMemoryInventoryService,
    InMemoryLedgerService, InventoryService, LedgerService, SaleCoordinator,
};
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::sales::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SagaStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::observability::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::observability::health::<S>))
        .route(
            "/sales",
            post(routes::sales::create::<S>).get(routes::sales::list::<S>),
        )
        .route("/sales/preview", post(routes::sales::preview::<S>))
        .route("/sales/{id}", get(routes::sales::get::<S>))
        .route("/sales/{id}/cancel", post(routes::sales::cancel::<S>))
        .route("/sales/{id}/sagas", get(routes::sales::sagas::<S>))
        .route("/reconciliation", get(routes::reconciliation::list::<S>))
        .route(
            "/reconciliation/{sale_id}/{operation}/retry",
            post(routes::reconciliation::retry::<S>),
        )
        .route(
            "/reconciliation/{sale_id}/{operation}/resolve",
            post(routes::reconciliation::resolve::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds application state from explicit services.
pub fn create_state<S: SagaStore + Clone + 'static>(
    store: S,
    inventory: Arc<dyn InventoryService>,
    ledger: Arc<dyn LedgerService>,
    config: CoordinatorConfig,
) -> Arc<AppState<S>> {
    let coordinator = SaleCoordinator::with_config(store, inventory, ledger, config);
    Arc::new(AppState {
        coordinator: Arc::new(coordinator),
    })
}

/// Builds application state from configuration: HTTP services where a URL is
/// set, the in-memory demo services otherwise.
pub fn create_configured_state<S: SagaStore + Clone + 'static>(
    store: S,
    config: &Config,
) -> Result<Arc<AppState<S>>, reqwest::Error> {
    let inventory: Arc<dyn InventoryService> = match &config.inventory_url {
        Some(url) => Arc::new(HttpInventoryService::new(url.clone())?),
        None => {
            tracing::warn!("INVENTORY_URL not set, using the in-memory demo inventory");
            Arc::new(InMemoryInventoryService::with_demo_catalog())
        }
    };
    let ledger: Arc<dyn LedgerService> = match &config.ledger_url {
        Some(url) => Arc::new(HttpLedgerService::new(url.clone())?),
        None => {
            tracing::warn!("LEDGER_URL not set, using the in-memory ledger");
            Arc::new(InMemoryLedgerService::new())
        }
    };
    Ok(create_state(store, inventory, ledger, config.coordinator_config()))
}

/// Creates the default application state with the in-memory demo services.
pub fn create_default_state<S: SagaStore + Clone + 'static>(store: S) -> Arc<AppState<S>> {
    create_state(
        store,
        Arc::new(InMemoryInventoryService::with_demo_catalog()),
        Arc::new(InMemoryLedgerService::new()),
        CoordinatorConfig::default(),
    )
}
