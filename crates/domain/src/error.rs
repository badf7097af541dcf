//! Domain error types.

use thiserror::Error;

use crate::sale::{Money, ProductId, SaleStatus};

/// Errors raised when a cart or sale violates a domain rule.
///
/// All of these are detected before any side effect reaches the ledger or
/// the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The cart has no lines.
    #[error("Cart must contain at least one item")]
    EmptyCart,

    /// A cart line has a blank product identifier.
    #[error("Cart line has an empty product id")]
    EmptyProductId,

    /// A cart or sale line has a quantity below one, or merged lines overflow.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// A unit price is negative.
    #[error("Invalid price {price} for product {product_id}")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// A sale's stored total disagrees with its line items.
    #[error("Sale total {actual} does not match line items ({expected})")]
    TotalMismatch { expected: Money, actual: Money },

    /// A sale status change that the lifecycle does not allow.
    #[error("Cannot move sale from {from} to {to}")]
    InvalidStatusTransition { from: SaleStatus, to: SaleStatus },
}
