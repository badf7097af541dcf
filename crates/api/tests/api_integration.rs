//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{CoordinatorConfig, InMemoryInventoryService, InMemoryLedgerService, RetryPolicy};
use saga_store::InMemorySagaStore;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    inventory: InMemoryInventoryService,
    ledger: InMemoryLedgerService,
}

fn setup() -> TestApp {
    let inventory = InMemoryInventoryService::new()
        .with_product("BREAD", "Bread", Money::from_cents(250), 10)
        .with_product("COFFEE", "Coffee beans", Money::from_cents(1250), 2);
    let ledger = InMemoryLedgerService::new();
    let config = CoordinatorConfig {
        retry: RetryPolicy::immediate(2),
        ..CoordinatorConfig::default()
    };
    let state = api::create_state(
        InMemorySagaStore::new(),
        Arc::new(inventory.clone()),
        Arc::new(ledger.clone()),
        config,
    );
    TestApp {
        app: api::create_app(state, get_metrics_handle()),
        inventory,
        ledger,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn bread_sale(quantity: u32) -> Value {
    json!({
        "lines": [{ "product_id": "BREAD", "quantity": quantity }],
        "payment_method": "card"
    })
}

async fn create_sale(app: &axum::Router, quantity: u32) -> Value {
    let (status, body) = send(app, post_json("/sales", bread_sale(quantity))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn test_health_check() {
    let t = setup();

    let (status, body) = send(&t.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["reconciliation_backlog"], 0);
}

#[tokio::test]
async fn test_create_sale() {
    let t = setup();

    let body = create_sale(&t.app, 3).await;

    assert_eq!(body["sale"]["status"], "completed");
    assert_eq!(body["sale"]["total"], 750);
    assert_eq!(body["sale"]["payment_method"], "card");
    assert_eq!(body["stock_sync_pending"], false);
    assert_eq!(body["replayed"], false);
    assert_eq!(t.inventory.stock_of("BREAD"), Some(7));
}

#[tokio::test]
async fn test_create_sale_ignores_client_price() {
    let t = setup();

    let (status, body) = send(
        &t.app,
        post_json(
            "/sales",
            json!({ "lines": [{ "product_id": "COFFEE", "quantity": 1, "client_unit_price": 1 }] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["sale"]["total"], 1250);
    assert_eq!(body["sale"]["line_items"][0]["unit_price"], 1250);
}

#[tokio::test]
async fn test_idempotency_key_replays_the_sale() {
    let t = setup();
    let key = uuid::Uuid::new_v4().to_string();
    let request = || {
        Request::builder()
            .method("POST")
            .uri("/sales")
            .header("content-type", "application/json")
            .header("Idempotency-Key", key.as_str())
            .body(Body::from(bread_sale(2).to_string()))
            .unwrap()
    };

    let (status, first) = send(&t.app, request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["replayed"], false);

    let (status, second) = send(&t.app, request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["sale"]["id"], first["sale"]["id"]);

    assert_eq!(t.ledger.sale_count(), 1);
    assert_eq!(t.inventory.stock_of("BREAD"), Some(8));
}

#[tokio::test]
async fn test_malformed_idempotency_key_is_rejected() {
    let t = setup();
    let request = Request::builder()
        .method("POST")
        .uri("/sales")
        .header("content-type", "application/json")
        .header("Idempotency-Key", "not-a-uuid")
        .body(Body::from(bread_sale(1).to_string()))
        .unwrap();

    let (status, _) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(t.ledger.sale_count(), 0);
}

#[tokio::test]
async fn test_empty_cart_is_a_validation_error() {
    let t = setup();

    let (status, body) = send(&t.app, post_json("/sales", json!({ "lines": [] }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(t.ledger.sale_count(), 0);
}

#[tokio::test]
async fn test_unknown_product_is_unprocessable() {
    let t = setup();

    let (status, body) = send(
        &t.app,
        post_json("/sales", json!({ "lines": [{ "product_id": "GHOST", "quantity": 1 }] })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "product_not_found");
}

#[tokio::test]
async fn test_insufficient_stock_is_a_conflict() {
    let t = setup();

    let (status, body) = send(
        &t.app,
        post_json("/sales", json!({ "lines": [{ "product_id": "COFFEE", "quantity": 3 }] })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "insufficient_stock");
    assert_eq!(t.ledger.sale_count(), 0);
    assert_eq!(t.inventory.stock_of("COFFEE"), Some(2));
}

#[tokio::test]
async fn test_get_and_list_sales() {
    let t = setup();
    let created = create_sale(&t.app, 1).await;
    let id = created["sale"]["id"].as_str().unwrap().to_string();

    let (status, sale) = send(&t.app, get(&format!("/sales/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sale["id"], id.as_str());

    let (status, all) = send(&t.app, get("/sales")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (status, cancelled) = send(&t.app, get("/sales?status=cancelled")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cancelled.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_sale_errors() {
    let t = setup();

    let (status, _) = send(&t.app, get("/sales/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&t.app, get(&format!("/sales/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "sale_not_found");
}

#[tokio::test]
async fn test_cancel_sale_restores_stock() {
    let t = setup();
    let created = create_sale(&t.app, 4).await;
    let id = created["sale"]["id"].as_str().unwrap().to_string();
    assert_eq!(t.inventory.stock_of("BREAD"), Some(6));

    let (status, body) = send(&t.app, post_empty(&format!("/sales/{id}/cancel"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sale"]["status"], "cancelled");
    assert_eq!(body["replayed"], false);
    assert_eq!(t.inventory.stock_of("BREAD"), Some(10));

    let (status, again) = send(&t.app, post_empty(&format!("/sales/{id}/cancel"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["replayed"], true);
    assert_eq!(t.inventory.stock_of("BREAD"), Some(10));
}

#[tokio::test]
async fn test_cancel_unknown_sale() {
    let t = setup();

    let (status, _) = send(
        &t.app,
        post_empty(&format!("/sales/{}/cancel", uuid::Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preview_trims_without_mutating() {
    let t = setup();

    let (status, body) = send(
        &t.app,
        post_json(
            "/sales/preview",
            json!({ "lines": [
                { "product_id": "COFFEE", "quantity": 5 },
                { "product_id": "GHOST", "quantity": 1 }
            ] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lines"][0]["quantity"], 2);
    assert_eq!(body["lines"][0]["trimmed"], true);
    assert_eq!(body["removed"], json!(["GHOST"]));
    assert_eq!(body["total"], 2500);
    assert_eq!(t.inventory.stock_of("COFFEE"), Some(2));
    assert_eq!(t.ledger.sale_count(), 0);
}

#[tokio::test]
async fn test_sagas_endpoint() {
    let t = setup();
    let created = create_sale(&t.app, 1).await;
    let id = created["sale"]["id"].as_str().unwrap().to_string();

    let (status, sagas) = send(&t.app, get(&format!("/sales/{id}/sagas"))).await;

    assert_eq!(status, StatusCode::OK);
    let sagas = sagas.as_array().unwrap();
    assert_eq!(sagas.len(), 1);
    assert_eq!(sagas[0]["operation"], "create");
    assert_eq!(sagas[0]["state"], "completed");

    let (status, _) = send(
        &t.app,
        get(&format!("/sales/{}/sagas", uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_decrement_is_queued_and_retried() {
    let t = setup();
    t.inventory.fail_next_decrements(2);

    let body = create_sale(&t.app, 2).await;
    assert_eq!(body["stock_sync_pending"], true);
    assert_eq!(body["sale"]["status"], "stock_sync_pending");
    let id = body["sale"]["id"].as_str().unwrap().to_string();

    let (status, open) = send(&t.app, get("/reconciliation?status=open")).await;
    assert_eq!(status, StatusCode::OK);
    let open = open.as_array().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["sale_id"], id.as_str());
    assert_eq!(open[0]["operation"], "create");

    let (status, entry) = send(
        &t.app,
        post_empty(&format!("/reconciliation/{id}/create/retry")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{entry}");
    assert_eq!(entry["status"], "resolved");
    assert_eq!(t.inventory.stock_of("BREAD"), Some(8));

    let (_, sale) = send(&t.app, get(&format!("/sales/{id}"))).await;
    assert_eq!(sale["status"], "completed");

    let (_, open) = send(&t.app, get("/reconciliation?status=open")).await;
    assert!(open.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_health_reports_reconciliation_backlog() {
    let t = setup();
    t.inventory.fail_next_decrements(2);
    create_sale(&t.app, 1).await;

    let (status, body) = send(&t.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reconciliation_backlog"], 1);
}

#[tokio::test]
async fn test_operator_resolves_entry() {
    let t = setup();
    t.inventory.fail_next_decrements(2);
    let body = create_sale(&t.app, 1).await;
    let id = body["sale"]["id"].as_str().unwrap().to_string();

    let (status, entry) = send(
        &t.app,
        post_json(
            &format!("/reconciliation/{id}/create/resolve"),
            json!({ "resolved_by": "floor-manager", "note": "counted shelf by hand" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{entry}");
    assert_eq!(entry["status"], "resolved");
    assert_eq!(entry["resolved_by"], "floor-manager");
    assert_eq!(entry["note"], "counted shelf by hand");
    // The operator fixed the stock; the coordinator does not decrement again.
    assert_eq!(t.inventory.stock_of("BREAD"), Some(10));

    let (_, sale) = send(&t.app, get(&format!("/sales/{id}"))).await;
    assert_eq!(sale["status"], "completed");

    let (_, entries) = send(&t.app, get("/reconciliation?status=resolved")).await;
    assert_eq!(entries[0]["note"], "counted shelf by hand");
}

#[tokio::test]
async fn test_reconciliation_request_errors() {
    let t = setup();
    let id = uuid::Uuid::new_v4();

    let (status, body) = send(&t.app, post_empty(&format!("/reconciliation/{id}/create/retry"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "reconciliation_not_found");

    let (status, _) = send(&t.app, post_empty(&format!("/reconciliation/{id}/refund/retry"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&t.app, get("/reconciliation?status=stuck")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        post_json(
            &format!("/reconciliation/{id}/cancel/resolve"),
            json!({ "resolved_by": "  " }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup();
    create_sale(&t.app, 1).await;

    let response = t.app.clone().oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("sale_sagas_started_total"));
}

#[tokio::test]
async fn test_configured_state_uses_http_services() {
    let config = api::config::Config {
        inventory_url: Some("http://127.0.0.1:9".to_string()),
        ledger_url: Some("http://127.0.0.1:9".to_string()),
        reconcile_max_attempts: 7,
        ..api::config::Config::default()
    };

    let state = api::create_configured_state(InMemorySagaStore::new(), &config).unwrap();

    assert_eq!(state.coordinator.config().reconcile_max_attempts, 7);
}
