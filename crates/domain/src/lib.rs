//! Domain layer for the sale transaction coordinator.
//!
//! This crate holds the data the coordinator reasons about but does not own:
//! - Sale records as the Sale Ledger Service stores them
//! - Cart requests and their shape rules
//! - Stock snapshots and compensation entries exchanged with the Inventory Service
//! - The sale status lifecycle

pub mod error;
pub mod sale;

pub use error::DomainError;
pub use sale::{
    Cart, CartLine, CompensationEntry, CustomerInfo, LineItem, Money, NewSale, PaymentMethod,
    ProductId, Sale, SaleFilter, SaleStatus, StockItem, StockSnapshot,
};
