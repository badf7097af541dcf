//! API server entry point.

use std::error::Error;

use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::ReconciliationWorker;
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn describe_metrics() {
    metrics::describe_counter!("sale_sagas_started_total", "Sagas started, by operation");
    metrics::describe_counter!("sale_sagas_completed_total", "Sagas that reached their target");
    metrics::describe_counter!(
        "sale_sagas_escalated_total",
        "Sagas handed to the reconciliation queue"
    );
    metrics::describe_counter!(
        "sale_stock_conflicts_total",
        "Sales cancelled because stock ran out after validation"
    );
    metrics::describe_counter!("sale_step_retries_total", "Retried service calls, by step");
    metrics::describe_histogram!(
        "sale_saga_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of one saga"
    );
    metrics::describe_counter!(
        "idempotency_cache_hits_total",
        "Inventory mutations answered from the idempotency cache"
    );
    metrics::describe_counter!(
        "reconciliation_attempts_total",
        "Reconciliation attempts, by outcome"
    );
    metrics::describe_gauge!(
        "reconciliation_open_entries",
        "Entries waiting for the reconciliation worker"
    );
}

async fn run<S: SagaStore + Clone + 'static>(
    store: S,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), Box<dyn Error>> {
    let state = api::create_configured_state(store, config)?;

    // Finish sagas a previous process left in flight before taking traffic.
    // The reconciliation worker and the next restart pick up what this misses.
    match state.coordinator.recover_in_flight().await {
        Ok(report) => tracing::info!(
            resumed = report.resumed,
            adopted = report.adopted,
            repaired = report.repaired,
            failed = report.failed,
            "startup recovery finished"
        ),
        Err(e) => tracing::error!(error = %e, "startup recovery failed, serving anyway"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::spawn(
        state.coordinator.clone(),
        config.reconcile_interval(),
        shutdown_rx,
    );

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    worker.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    // 3. Pick the saga store and serve
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect(url).await?;
            let store = PostgresSagaStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL saga store");
            run(store, &config, metrics_handle).await?;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, saga state will not survive a restart");
            run(InMemorySagaStore::new(), &config, metrics_handle).await?;
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
