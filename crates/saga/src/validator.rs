//! Stock validation against the Inventory Service.

use std::collections::HashMap;

use domain::{Cart, Money, ProductId, StockSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::retry::RetryPolicy;
use crate::services::{InventoryService, StockLevel};

/// One line of a trimmed cart preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub requested_quantity: u32,
    /// Requested quantity clamped to availability.
    pub quantity: u32,
    pub available_quantity: u32,
    pub trimmed: bool,
}

impl PreviewLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A cart as it could be sold right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartPreview {
    pub lines: Vec<PreviewLine>,
    /// Products dropped entirely: unknown or out of stock.
    pub removed: Vec<ProductId>,
    pub total: Money,
}

impl CartPreview {
    /// Returns true if every line can be sold as requested.
    pub fn is_satisfiable(&self) -> bool {
        self.removed.is_empty() && self.lines.iter().all(|l| !l.trimmed)
    }
}

/// Checks a cart against current stock with a single read.
///
/// The check is advisory: it reserves nothing, and the authoritative check is
/// the Inventory Service's own compare-and-decrement.
#[derive(Clone)]
pub struct StockValidator<I> {
    inventory: I,
    retry: RetryPolicy,
}

impl<I: InventoryService> StockValidator<I> {
    pub fn new(inventory: I, retry: RetryPolicy) -> Self {
        Self { inventory, retry }
    }

    async fn levels(&self, cart: &Cart) -> Result<HashMap<ProductId, StockLevel>> {
        let product_ids = cart.product_ids();
        let outcome = self
            .retry
            .run("check_stock", || self.inventory.check_stock(&product_ids))
            .await;
        let levels = outcome
            .result
            .map_err(|e| SagaError::exhausted("check_stock", outcome.attempts, e))?;
        Ok(levels
            .into_iter()
            .map(|level| (level.product_id.clone(), level))
            .collect())
    }

    /// Returns one snapshot per cart line, priced by the inventory.
    ///
    /// Fails with `ProductNotFound` for the first unknown product, then with
    /// `InsufficientStock` for the first line availability cannot cover.
    #[tracing::instrument(skip_all, fields(lines = cart.len()))]
    pub async fn validate(&self, cart: &Cart) -> Result<Vec<StockSnapshot>> {
        let levels = self.levels(cart).await?;

        if let Some(missing) = cart
            .lines()
            .iter()
            .find(|line| !levels.contains_key(&line.product_id))
        {
            return Err(SagaError::ProductNotFound(missing.product_id.clone()));
        }

        let mut snapshots = Vec::with_capacity(cart.len());
        for line in cart.lines() {
            let Some(level) = levels.get(&line.product_id) else {
                continue;
            };
            if let Some(client_price) = line.client_unit_price
                && client_price != level.unit_price
            {
                tracing::debug!(
                    product_id = %line.product_id,
                    client_price = %client_price,
                    unit_price = %level.unit_price,
                    "ignoring client-supplied price"
                );
            }
            let snapshot = StockSnapshot {
                product_id: line.product_id.clone(),
                name: level.name.clone(),
                available_quantity: level.available,
                authoritative_unit_price: level.unit_price,
                requested_quantity: line.quantity,
            };
            if !snapshot.is_satisfiable() {
                return Err(SagaError::InsufficientStock {
                    product_id: snapshot.product_id,
                    available: snapshot.available_quantity,
                    requested: snapshot.requested_quantity,
                });
            }
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    /// Clamps every line to available stock instead of rejecting the cart.
    #[tracing::instrument(skip_all, fields(lines = cart.len()))]
    pub async fn preview(&self, cart: &Cart) -> Result<CartPreview> {
        let levels = self.levels(cart).await?;

        let mut lines = Vec::with_capacity(cart.len());
        let mut removed = Vec::new();
        for line in cart.lines() {
            match levels.get(&line.product_id) {
                Some(level) if level.available > 0 => {
                    let quantity = line.quantity.min(level.available);
                    lines.push(PreviewLine {
                        product_id: line.product_id.clone(),
                        name: level.name.clone(),
                        unit_price: level.unit_price,
                        requested_quantity: line.quantity,
                        quantity,
                        available_quantity: level.available,
                        trimmed: quantity < line.quantity,
                    });
                }
                _ => removed.push(line.product_id.clone()),
            }
        }

        let total = lines.iter().map(PreviewLine::line_total).sum();
        Ok(CartPreview {
            lines,
            removed,
            total,
        })
    }
}
