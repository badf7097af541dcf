//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use domain::{Money, ProductId, StockItem};
use serde::{Deserialize, Serialize};

use super::ServiceError;

/// Current availability and price of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub name: String,
    pub available: u32,
    pub unit_price: Money,
}

/// Operations the coordinator needs from the Inventory Service.
///
/// Mutations carry an idempotency key and must be safe to call twice with the
/// same key: the second call reports the items applied by the first.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Returns stock levels for the known products among `product_ids`.
    /// Unknown products are simply absent from the result.
    async fn check_stock(&self, product_ids: &[ProductId]) -> Result<Vec<StockLevel>, ServiceError>;

    /// Atomically removes `items` from stock, or nothing at all.
    async fn decrement(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError>;

    /// Returns `items` to stock.
    async fn increment(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError>;
}

#[async_trait]
impl<T: InventoryService + ?Sized> InventoryService for Arc<T> {
    async fn check_stock(&self, product_ids: &[ProductId]) -> Result<Vec<StockLevel>, ServiceError> {
        (**self).check_stock(product_ids).await
    }

    async fn decrement(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        (**self).decrement(items, idempotency_key).await
    }

    async fn increment(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        (**self).increment(items, idempotency_key).await
    }
}

#[derive(Debug, Clone)]
struct Product {
    name: String,
    unit_price: Money,
    quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Decrement,
    Increment,
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    products: HashMap<ProductId, Product>,
    applied: HashMap<String, Vec<StockItem>>,
    fail_next_decrements: u32,
    fail_next_increments: u32,
    lose_next_responses: u32,
    unavailable: bool,
    delay: Option<Duration>,
    mutation_calls: usize,
    applied_mutations: usize,
}

/// In-memory inventory for tests and the demo binary.
///
/// Decrements are compare-and-decrement under one lock, so two sales racing
/// for the last units cannot both succeed. Failure toggles simulate an
/// unreliable service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates an inventory with no products.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an inventory stocked with a small bakery catalog.
    pub fn with_demo_catalog() -> Self {
        Self::new()
            .with_product("BREAD-001", "Sourdough loaf", Money::from_cents(450), 40)
            .with_product("CROIS-002", "Butter croissant", Money::from_cents(220), 60)
            .with_product("BAGUE-003", "Baguette", Money::from_cents(300), 30)
            .with_product("MUFF-004", "Blueberry muffin", Money::from_cents(275), 24)
            .with_product("CAKE-005", "Carrot cake slice", Money::from_cents(525), 12)
    }

    /// Adds or replaces a product.
    pub fn with_product(
        self,
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        self.lock().products.insert(
            product_id.into(),
            Product {
                name: name.into(),
                unit_price,
                quantity,
            },
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryInventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current quantity of a product.
    pub fn stock_of(&self, product_id: &str) -> Option<u32> {
        self.lock()
            .products
            .get(&ProductId::new(product_id))
            .map(|p| p.quantity)
    }

    /// Overwrites the quantity of an existing product.
    pub fn set_stock(&self, product_id: &str, quantity: u32) {
        if let Some(product) = self.lock().products.get_mut(&ProductId::new(product_id)) {
            product.quantity = quantity;
        }
    }

    /// Makes the next `n` decrement calls fail transiently without applying.
    pub fn fail_next_decrements(&self, n: u32) {
        self.lock().fail_next_decrements = n;
    }

    /// Makes the next `n` increment calls fail transiently without applying.
    pub fn fail_next_increments(&self, n: u32) {
        self.lock().fail_next_increments = n;
    }

    /// Makes the next `n` mutations apply and then report a transient failure,
    /// as if the response was lost on the way back.
    pub fn lose_next_responses(&self, n: u32) {
        self.lock().lose_next_responses = n;
    }

    /// Makes every call fail transiently until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Delays every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    /// Returns how many mutation calls reached the service.
    pub fn mutation_calls(&self) -> usize {
        self.lock().mutation_calls
    }

    /// Returns how many mutations actually changed stock.
    pub fn applied_mutations(&self) -> usize {
        self.lock().applied_mutations
    }

    async fn pause(&self) {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn mutate(
        &self,
        mutation: Mutation,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        let mut state = self.lock();
        state.mutation_calls += 1;

        if state.unavailable {
            return Err(ServiceError::Transient("inventory unavailable".into()));
        }
        let pending_failures = match mutation {
            Mutation::Decrement => &mut state.fail_next_decrements,
            Mutation::Increment => &mut state.fail_next_increments,
        };
        if *pending_failures > 0 {
            *pending_failures -= 1;
            return Err(ServiceError::Transient("inventory returned 503".into()));
        }

        if let Some(applied) = state.applied.get(idempotency_key) {
            return Ok(applied.clone());
        }

        for item in items {
            let product = state
                .products
                .get(&item.product_id)
                .ok_or_else(|| ServiceError::Rejected(format!("unknown product {}", item.product_id)))?;
            if mutation == Mutation::Decrement && product.quantity < item.quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id: item.product_id.clone(),
                    available: product.quantity,
                    requested: item.quantity,
                });
            }
        }

        for item in items {
            if let Some(product) = state.products.get_mut(&item.product_id) {
                product.quantity = match mutation {
                    Mutation::Decrement => product.quantity - item.quantity,
                    Mutation::Increment => product.quantity.saturating_add(item.quantity),
                };
            }
        }
        state.applied_mutations += 1;
        state
            .applied
            .insert(idempotency_key.to_string(), items.to_vec());

        if state.lose_next_responses > 0 {
            state.lose_next_responses -= 1;
            return Err(ServiceError::Transient("connection reset after apply".into()));
        }

        Ok(items.to_vec())
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn check_stock(&self, product_ids: &[ProductId]) -> Result<Vec<StockLevel>, ServiceError> {
        self.pause().await;
        let state = self.lock();
        if state.unavailable {
            return Err(ServiceError::Transient("inventory unavailable".into()));
        }
        Ok(product_ids
            .iter()
            .filter_map(|id| {
                state.products.get(id).map(|p| StockLevel {
                    product_id: id.clone(),
                    name: p.name.clone(),
                    available: p.quantity,
                    unit_price: p.unit_price,
                })
            })
            .collect())
    }

    async fn decrement(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        self.pause().await;
        self.mutate(Mutation::Decrement, items, idempotency_key)
    }

    async fn increment(
        &self,
        items: &[StockItem],
        idempotency_key: &str,
    ) -> Result<Vec<StockItem>, ServiceError> {
        self.pause().await;
        self.mutate(Mutation::Increment, items, idempotency_key)
    }
}
