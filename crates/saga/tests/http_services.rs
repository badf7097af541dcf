//! HTTP adapters exercised against local axum stubs of both services.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::SaleId;
use domain::{
    LineItem, Money, NewSale, PaymentMethod, ProductId, Sale, SaleFilter, SaleStatus, StockItem,
};
use saga::{HttpInventoryService, HttpLedgerService, InventoryService, LedgerService, ServiceError};
use serde_json::{Value, json};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// -- Inventory stub ---------------------------------------------------------

const STUB_AVAILABLE: u64 = 5;

#[derive(Clone, Default)]
struct InventoryStub {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    fail_with: Arc<Mutex<Option<StatusCode>>>,
}

async fn check_products(Json(body): Json<Value>) -> Json<Value> {
    let products: Vec<Value> = body["product_ids"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|id| id == "BREAD")
        .map(|id| {
            json!({
                "product_id": id,
                "name": "Bread",
                "available": STUB_AVAILABLE,
                "unit_price": 250
            })
        })
        .collect();
    Json(json!({ "products": products }))
}

async fn update_stock(
    State(stub): State<InventoryStub>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(status) = *stub.fail_with.lock().unwrap() {
        return (status, "stub failure").into_response();
    }

    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let operation = body["operation"].as_str().unwrap_or_default().to_string();
    stub.calls.lock().unwrap().push((operation.clone(), key));

    let items = body["items"].clone();
    let requested = items[0]["quantity"].as_u64().unwrap_or_default();
    if operation == "decrement" && requested > STUB_AVAILABLE {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "product_id": items[0]["product_id"],
                "available": STUB_AVAILABLE,
                "requested": requested
            })),
        )
            .into_response();
    }
    Json(json!({ "applied_items": items })).into_response()
}

async fn inventory_stub() -> (InventoryStub, HttpInventoryService) {
    let stub = InventoryStub::default();
    let app = Router::new()
        .route("/products/check", post(check_products))
        .route("/products/update-stock", post(update_stock))
        .with_state(stub.clone());
    let addr = serve(app).await;
    (stub, HttpInventoryService::new(format!("http://{addr}/")).unwrap())
}

#[tokio::test]
async fn test_check_stock_omits_unknown_products() {
    let (_, inventory) = inventory_stub().await;

    let levels = inventory
        .check_stock(&[ProductId::new("BREAD"), ProductId::new("GHOST")])
        .await
        .unwrap();

    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].product_id.as_str(), "BREAD");
    assert_eq!(levels[0].available, 5);
    assert_eq!(levels[0].unit_price, Money::from_cents(250));
}

#[tokio::test]
async fn test_mutations_carry_idempotency_key() {
    let (stub, inventory) = inventory_stub().await;
    let items = vec![StockItem::new("BREAD", 2)];

    let applied = inventory.decrement(&items, "sale-1-create").await.unwrap();
    assert_eq!(applied, items);
    inventory.increment(&items, "sale-1-cancel").await.unwrap();

    let calls = stub.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("decrement".to_string(), "sale-1-create".to_string()),
            ("increment".to_string(), "sale-1-cancel".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_conflict_maps_to_insufficient_stock() {
    let (_, inventory) = inventory_stub().await;

    let err = inventory
        .decrement(&[StockItem::new("BREAD", 9)], "k")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ServiceError::InsufficientStock {
            product_id: ProductId::new("BREAD"),
            available: 5,
            requested: 9,
        }
    );
}

#[tokio::test]
async fn test_status_codes_classify_failures() {
    let (stub, inventory) = inventory_stub().await;
    let items = [StockItem::new("BREAD", 1)];

    *stub.fail_with.lock().unwrap() = Some(StatusCode::SERVICE_UNAVAILABLE);
    let err = inventory.decrement(&items, "k").await.unwrap_err();
    assert!(matches!(err, ServiceError::Transient(_)));

    *stub.fail_with.lock().unwrap() = Some(StatusCode::TOO_MANY_REQUESTS);
    assert!(inventory.decrement(&items, "k").await.unwrap_err().is_transient());

    *stub.fail_with.lock().unwrap() = Some(StatusCode::BAD_REQUEST);
    let err = inventory.decrement(&items, "k").await.unwrap_err();
    assert!(matches!(err, ServiceError::Rejected(msg) if msg.contains("stub failure")));
}

#[tokio::test]
async fn test_unreachable_service_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let inventory = HttpInventoryService::new(format!("http://{addr}")).unwrap();
    let err = inventory
        .check_stock(&[ProductId::new("BREAD")])
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

// -- Ledger stub ------------------------------------------------------------

type Sales = Arc<Mutex<HashMap<SaleId, Sale>>>;

async fn create_sale(State(sales): State<Sales>, Json(new_sale): Json<NewSale>) -> Response {
    let sale = new_sale.into_sale(SaleId::new());
    sales.lock().unwrap().insert(sale.id, sale.clone());
    (StatusCode::CREATED, Json(sale)).into_response()
}

async fn get_sale(State(sales): State<Sales>, Path(id): Path<SaleId>) -> Response {
    match sales.lock().unwrap().get(&id) {
        Some(sale) => Json(sale.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn update_status(
    State(sales): State<Sales>,
    Path(id): Path<SaleId>,
    Json(body): Json<Value>,
) -> Response {
    let Ok(status) = serde_json::from_value::<SaleStatus>(body["status"].clone()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut sales = sales.lock().unwrap();
    let Some(sale) = sales.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match sale.transition(status) {
        Ok(()) => Json(sale.clone()).into_response(),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    }
}

async fn list_sales(State(sales): State<Sales>, Query(filter): Query<SaleFilter>) -> Json<Vec<Sale>> {
    let sales = sales.lock().unwrap();
    Json(sales.values().filter(|s| filter.matches(s)).cloned().collect())
}

async fn ledger_stub() -> HttpLedgerService {
    let app = Router::new()
        .route("/sales", post(create_sale).get(list_sales))
        .route("/sales/{id}", get(get_sale))
        .route("/sales/{id}/status", post(update_status))
        .with_state(Sales::default());
    let addr = serve(app).await;
    HttpLedgerService::new(format!("http://{addr}")).unwrap()
}

fn new_sale() -> NewSale {
    NewSale::new(
        vec![LineItem::new("BREAD", "Bread", Money::from_cents(250), 2)],
        PaymentMethod::Card,
    )
    .unwrap()
}

#[tokio::test]
async fn test_ledger_create_get_and_update() {
    let ledger = ledger_stub().await;

    let created = ledger.create_sale(new_sale()).await.unwrap();
    assert_eq!(created.status, SaleStatus::Pending);
    assert_eq!(created.total, Money::from_cents(500));

    let fetched = ledger.get_sale(created.id).await.unwrap();
    assert_eq!(fetched, Some(created.clone()));

    let completed = ledger
        .update_status(created.id, SaleStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.status, SaleStatus::Completed);
}

#[tokio::test]
async fn test_ledger_unknown_sale() {
    let ledger = ledger_stub().await;
    let id = SaleId::new();

    assert_eq!(ledger.get_sale(id).await.unwrap(), None);
    assert_eq!(
        ledger
            .update_status(id, SaleStatus::Cancelled)
            .await
            .unwrap_err(),
        ServiceError::SaleNotFound(id)
    );
}

#[tokio::test]
async fn test_ledger_rejects_illegal_transition() {
    let ledger = ledger_stub().await;
    let created = ledger.create_sale(new_sale()).await.unwrap();
    ledger
        .update_status(created.id, SaleStatus::Cancelled)
        .await
        .unwrap();

    let err = ledger
        .update_status(created.id, SaleStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Rejected(_)));
}

#[tokio::test]
async fn test_ledger_list_passes_filter() {
    let ledger = ledger_stub().await;
    let first = ledger.create_sale(new_sale()).await.unwrap();
    ledger.create_sale(new_sale()).await.unwrap();
    ledger
        .update_status(first.id, SaleStatus::Completed)
        .await
        .unwrap();

    let completed = ledger
        .list_sales(&SaleFilter::with_status(SaleStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, first.id);

    let all = ledger.list_sales(&SaleFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}
