//! Cart requests as submitted by a client.

use serde::{Deserialize, Serialize};

use super::{Money, ProductId};
use crate::error::DomainError;

/// One requested line of a cart.
///
/// `client_unit_price` is whatever the client believed the price was. It is
/// accepted so that existing clients can keep sending it, and never used for
/// billing: prices always come from the Inventory Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_unit_price: Option<Money>,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            client_unit_price: None,
        }
    }

    /// Attaches the price the client displayed.
    pub fn with_client_price(mut self, price: Money) -> Self {
        self.client_unit_price = Some(price);
        self
    }
}

/// A shape-validated cart.
///
/// Invariants: at least one line, every quantity ≥ 1, no blank product ids,
/// and at most one line per product (duplicates are merged in first-seen
/// order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Validates and normalizes raw cart lines.
    pub fn new(lines: Vec<CartLine>) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::EmptyCart);
        }

        let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.product_id.is_blank() {
                return Err(DomainError::EmptyProductId);
            }
            if line.quantity == 0 {
                return Err(DomainError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: 0,
                });
            }
            match merged.iter_mut().find(|l| l.product_id == line.product_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(
                        || DomainError::InvalidQuantity {
                            product_id: line.product_id,
                            quantity: u32::MAX,
                        },
                    )?;
                }
                None => merged.push(line),
            }
        }

        Ok(Self { lines: merged })
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.lines.iter().map(|l| l.product_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
