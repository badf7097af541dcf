//! HTTP adapters for the Inventory and Sale Ledger services.
//!
//! Status mapping shared by both adapters: `5xx`, `408`, `429`, timeouts and
//! connection errors are transient; `404` on a sale lookup is "not found";
//! any other `4xx` is a rejection.

use std::time::Duration;

use async_trait::async_trait;
use common::SaleId;
use domain::{NewSale, ProductId, Sale, SaleFilter, SaleStatus, StockItem};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{InventoryService, LedgerService, ServiceError, StockLevel};

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder().connect_timeout(CONNECT_TIMEOUT).build()
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    ServiceError::Transient(err.to_string())
}

async fn status_error(response: Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        ServiceError::Transient(detail)
    } else {
        ServiceError::Rejected(detail)
    }
}

#[derive(Debug, Serialize)]
struct CheckStockRequest<'a> {
    product_ids: &'a [ProductId],
}

#[derive(Debug, Deserialize)]
struct CheckStockResponse {
    products: Vec<StockLevel>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum StockOperation {
    Decrement,
    Increment,
}

#[derive(Debug, Serialize)]
struct UpdateStockRequest<'a> {
    operation: StockOperation,
    items: &'a [StockItem],
}

#[derive(Debug, Deserialize)]
struct UpdateStockResponse {
    applied_items: Vec<StockItem>,
}

#[derive(Debug, Deserialize)]
struct InsufficientStockBody {
    product_id: ProductId,
    available: u32,
    requested: u32,
}

/// Inventory Service client.
#[derive(Debug, Clone)]
pub struct HttpInventoryService {
    client: Client,
    base_url: String,
}

impl HttpInventoryService {
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_client()?, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn update_stock(
        &self,
        operation: StockOperation,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        let response = self
            .client
            .post(format!("{}/products/update-stock", self.base_url))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .json(&UpdateStockRequest { operation, items })
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            s if s.is_success() => {
                let body: UpdateStockResponse = response.json().await.map_err(transport_error)?;
                Ok(body.applied_items)
            }
            StatusCode::CONFLICT => {
                let body: InsufficientStockBody =
                    response.json().await.map_err(transport_error)?;
                Err(ServiceError::InsufficientStock {
                    product_id: body.product_id,
                    available: body.available,
                    requested: body.requested,
                })
            }
            _ => Err(status_error(response).await),
        }
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    #[tracing::instrument(skip(self), fields(products = product_ids.len()))]
    async fn check_stock(&self, product_ids: &[ProductId]) -> Result<Vec<StockLevel>, ServiceError> {
        let response = self
            .client
            .post(format!("{}/products/check", self.base_url))
            .json(&CheckStockRequest { product_ids })
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: CheckStockResponse = response.json().await.map_err(transport_error)?;
        Ok(body.products)
    }

    #[tracing::instrument(skip(self, items))]
    async fn decrement(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        self.update_stock(StockOperation::Decrement, items, idempotency_key)
            .await
    }

    #[tracing::instrument(skip(self, items))]
    async fn increment(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        self.update_stock(StockOperation::Increment, items, idempotency_key)
            .await
    }
}

#[derive(Debug, Serialize)]
struct UpdateStatusRequest {
    status: SaleStatus,
}

/// Sale Ledger Service client.
#[derive(Debug, Clone)]
pub struct HttpLedgerService {
    client: Client,
    base_url: String,
}

impl HttpLedgerService {
    /// Fails only if the TLS backend cannot be initialised.
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_client()?, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LedgerService for HttpLedgerService {
    #[tracing::instrument(skip(self, sale), fields(request_id = ?sale.request_id))]
    async fn create_sale(&self, sale: NewSale) -> Result<Sale, ServiceError> {
        let response = self
            .client
            .post(format!("{}/sales", self.base_url))
            .json(&sale)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        response.json().await.map_err(transport_error)
    }

    #[tracing::instrument(skip(self))]
    async fn get_sale(&self, id: SaleId) -> Result<Option<Sale>, ServiceError> {
        let response = self
            .client
            .get(format!("{}/sales/{id}", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response.json().await.map(Some).map_err(transport_error),
            _ => Err(status_error(response).await),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(&self, id: SaleId, status: SaleStatus) -> Result<Sale, ServiceError> {
        let response = self
            .client
            .post(format!("{}/sales/{id}/status", self.base_url))
            .json(&UpdateStatusRequest { status })
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::SaleNotFound(id)),
            s if s.is_success() => response.json().await.map_err(transport_error),
            _ => Err(status_error(response).await),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_sales(&self, filter: &SaleFilter) -> Result<Vec<Sale>, ServiceError> {
        let response = self
            .client
            .get(format!("{}/sales", self.base_url))
            .query(filter)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        response.json().await.map_err(transport_error)
    }
}
