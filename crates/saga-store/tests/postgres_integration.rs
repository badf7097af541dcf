//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container. Every test works on fresh sale
//! ids, so they do not need to truncate tables between runs.
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration
//! ```

use std::sync::Arc;

use saga_store::{
    IdempotencyEntry, PostgresSagaStore, ReconciliationEntry, ReconciliationStatus, SaleId,
    SagaOperation, SagaRecord, SagaState, SagaStore, SagaStoreExt, StoreError,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

async fn committed(store: &PostgresSagaStore, sale_id: SaleId, op: SagaOperation) -> SagaRecord {
    store.begin_saga(&SagaRecord::begin(sale_id, op)).await.unwrap();
    store.get_saga(sale_id, op).await.unwrap().unwrap()
}

#[tokio::test]
async fn begin_and_load_saga() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();

    let record = committed(&store, sale_id, SagaOperation::Create).await;
    assert_eq!(record.state, SagaState::StockCommitting);
    assert_eq!(record.version, 1);
    assert_eq!(record.idempotency_key, format!("{sale_id}-create"));
}

#[tokio::test]
async fn second_active_saga_is_refused() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();
    committed(&store, sale_id, SagaOperation::Create).await;

    let result = store
        .begin_saga(&SagaRecord::begin(sale_id, SagaOperation::Cancel))
        .await;
    assert!(matches!(
        result,
        Err(StoreError::SagaAlreadyActive {
            active: SagaOperation::Create,
            ..
        })
    ));
}

#[tokio::test]
async fn duplicate_saga_is_refused() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();
    let mut record = committed(&store, sale_id, SagaOperation::Create).await;
    record.transition(SagaState::Completed).unwrap();
    store.update_saga(&record).await.unwrap();

    let result = store
        .begin_saga(&SagaRecord::begin(sale_id, SagaOperation::Create))
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateSaga { .. })));
}

#[tokio::test]
async fn stale_update_conflicts() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();
    let record = committed(&store, sale_id, SagaOperation::Create).await;

    let mut winner = record.clone();
    winner.transition(SagaState::Completed).unwrap();
    assert_eq!(store.update_saga(&winner).await.unwrap(), 2);

    let mut loser = record;
    loser.record_attempts(3, Some("timeout".into()));
    loser.transition(SagaState::StockSyncPending).unwrap();
    let result = store.update_saga(&loser).await;
    assert!(matches!(
        result,
        Err(StoreError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn cancel_follows_completed_create() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();
    let mut create = committed(&store, sale_id, SagaOperation::Create).await;
    create.transition(SagaState::Completed).unwrap();
    store.update_saga(&create).await.unwrap();

    let cancel = committed(&store, sale_id, SagaOperation::Cancel).await;
    assert_eq!(cancel.state, SagaState::CancelCommitting);

    let active = store.active_saga(sale_id).await.unwrap().unwrap();
    assert_eq!(active.operation, SagaOperation::Cancel);

    let sagas = store.sagas_for_sale(sale_id).await.unwrap();
    assert_eq!(sagas.len(), 2);
}

#[tokio::test]
async fn in_flight_lists_committing_sagas() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();
    committed(&store, sale_id, SagaOperation::Create).await;

    let in_flight = store.in_flight_sagas().await.unwrap();
    assert!(in_flight.iter().any(|r| r.sale_id == sale_id));
}

#[tokio::test]
async fn outcomes_keep_first_write() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();
    let first = IdempotencyEntry::new(
        sale_id,
        SagaOperation::Create,
        serde_json::json!({"Ok": []}),
    );
    let second = IdempotencyEntry::new(
        sale_id,
        SagaOperation::Create,
        serde_json::json!({"Err": "late"}),
    );

    store.put_outcome(&first).await.unwrap();
    store.put_outcome(&second).await.unwrap();

    let cached = store.get_outcome(&first.key).await.unwrap().unwrap();
    assert_eq!(cached.outcome, serde_json::json!({"Ok": []}));
    assert!(store.get_outcome("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn reconciliation_queue_lifecycle() {
    let store = get_test_store().await;
    let sale_id = SaleId::new();
    let entry = ReconciliationEntry::new(sale_id, SagaOperation::Cancel, Some("timeout".into()));

    assert!(store.enqueue_reconciliation(&entry).await.unwrap());
    assert!(!store.enqueue_reconciliation(&entry).await.unwrap());

    let open = store
        .list_reconciliation(Some(ReconciliationStatus::Open))
        .await
        .unwrap();
    assert!(open.iter().any(|e| e.sale_id == sale_id));

    let mut stored = store
        .get_reconciliation(sale_id, SagaOperation::Cancel)
        .await
        .unwrap()
        .unwrap();
    stored.record_failure("still down", 1);
    store.update_reconciliation(&stored).await.unwrap();

    let parked = store
        .get_reconciliation(sale_id, SagaOperation::Cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parked.status, ReconciliationStatus::ManualActionRequired);
    assert_eq!(parked.attempts, 1);
    assert_eq!(parked.last_error.as_deref(), Some("still down"));

    let mut resolved = parked;
    resolved.resolve("floor-manager", Some("recounted the shelf"));
    store.update_reconciliation(&resolved).await.unwrap();

    let stored = store
        .get_reconciliation(sale_id, SagaOperation::Cancel)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_resolved());
    assert_eq!(stored.resolved_by.as_deref(), Some("floor-manager"));
    assert_eq!(stored.note.as_deref(), Some("recounted the shelf"));
}
