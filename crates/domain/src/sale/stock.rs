//! Types exchanged with the Inventory Service.

use common::SaleId;
use serde::{Deserialize, Serialize};

use super::{Money, ProductId, Sale};

/// A product/quantity pair sent to a stock mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Point-in-time view of one cart line against the Inventory Service.
///
/// Produced by the stock validator and never stored. The unit price here is
/// the only price a sale is ever billed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub available_quantity: u32,
    pub authoritative_unit_price: Money,
    pub requested_quantity: u32,
}

impl StockSnapshot {
    /// Returns true if the requested quantity is covered by availability.
    pub fn is_satisfiable(&self) -> bool {
        self.requested_quantity <= self.available_quantity
    }
}

/// Stock to hand back when a sale is cancelled.
///
/// Only ever built from a stored sale's own line items, so a cancellation
/// restores exactly what the create saga decremented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationEntry {
    pub sale_id: SaleId,
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CompensationEntry {
    /// Derives the compensation for every line of `sale`.
    pub fn for_sale(sale: &Sale) -> Vec<Self> {
        sale.line_items
            .iter()
            .map(|item| Self {
                sale_id: sale.id,
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect()
    }

    pub fn as_stock_item(&self) -> StockItem {
        StockItem::new(self.product_id.clone(), self.quantity)
    }
}
