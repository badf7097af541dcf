//! Sale records as stored by the Sale Ledger Service.

use chrono::{DateTime, NaiveDate, Utc};
use common::SaleId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CustomerInfo, Money, PaymentMethod, ProductId, SaleStatus, StockItem, StockSnapshot};
use crate::error::DomainError;

/// One billed line of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            unit_price,
            quantity,
        }
    }

    /// Returns the total price for this line (quantity * unit_price).
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

fn validate_line_items(items: &[LineItem]) -> Result<Money, DomainError> {
    if items.is_empty() {
        return Err(DomainError::EmptyCart);
    }
    for item in items {
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            });
        }
        if item.unit_price.is_negative() {
            return Err(DomainError::InvalidPrice {
                product_id: item.product_id.clone(),
                price: item.unit_price,
            });
        }
    }
    Ok(items.iter().map(LineItem::line_total).sum())
}

/// A sale about to be written to the ledger, with its total computed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSale {
    /// Client-supplied idempotency key; the ledger returns the existing sale
    /// when it sees the same key twice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    pub line_items: Vec<LineItem>,
    pub total: Money,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_info: Option<CustomerInfo>,
}

impl NewSale {
    /// Builds a new sale from explicit line items.
    pub fn new(line_items: Vec<LineItem>, payment_method: PaymentMethod) -> Result<Self, DomainError> {
        let total = validate_line_items(&line_items)?;
        Ok(Self {
            request_id: None,
            seller_id: None,
            line_items,
            total,
            payment_method,
            customer_info: None,
        })
    }

    /// Builds a new sale billed at the snapshot prices.
    pub fn from_snapshots(
        snapshots: &[StockSnapshot],
        payment_method: PaymentMethod,
    ) -> Result<Self, DomainError> {
        let items = snapshots
            .iter()
            .map(|s| {
                LineItem::new(
                    s.product_id.clone(),
                    s.name.clone(),
                    s.authoritative_unit_price,
                    s.requested_quantity,
                )
            })
            .collect();
        Self::new(items, payment_method)
    }

    pub fn with_request_id(mut self, request_id: Option<Uuid>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_seller(mut self, seller_id: Option<String>) -> Self {
        self.seller_id = seller_id;
        self
    }

    pub fn with_customer(mut self, customer_info: Option<CustomerInfo>) -> Self {
        self.customer_info = customer_info.and_then(CustomerInfo::non_empty);
        self
    }

    /// Materializes the stored form of this sale, as a ledger does on insert.
    pub fn into_sale(self, id: SaleId) -> Sale {
        Sale {
            id,
            request_id: self.request_id,
            seller_id: self.seller_id,
            line_items: self.line_items,
            total: self.total,
            payment_method: self.payment_method,
            customer_info: self.customer_info,
            status: SaleStatus::Pending,
            created_at: Utc::now(),
            cancelled_at: None,
        }
    }
}

/// A sale as the ledger stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    pub line_items: Vec<LineItem>,
    pub total: Money,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_info: Option<CustomerInfo>,
    pub status: SaleStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Checks the stored total against the line items.
    pub fn verify_total(&self) -> Result<(), DomainError> {
        let expected: Money = self.line_items.iter().map(LineItem::line_total).sum();
        if expected == self.total {
            Ok(())
        } else {
            Err(DomainError::TotalMismatch {
                expected,
                actual: self.total,
            })
        }
    }

    /// Stock items the create saga decrements for this sale.
    pub fn stock_items(&self) -> Vec<StockItem> {
        self.line_items
            .iter()
            .map(|item| StockItem::new(item.product_id.clone(), item.quantity))
            .collect()
    }

    /// Applies a status change, stamping `cancelled_at` on cancellation.
    ///
    /// Totals and line items are never touched.
    pub fn transition(&mut self, next: SaleStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        if next == SaleStatus::Cancelled && self.cancelled_at.is_none() {
            self.cancelled_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}

/// Listing filter for the ledger's sales index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SaleStatus>,
    /// Inclusive lower bound on the creation date (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the creation date (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

impl SaleFilter {
    pub fn with_status(status: SaleStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, sale: &Sale) -> bool {
        if let Some(status) = self.status
            && sale.status != status
        {
            return false;
        }
        let day = sale.created_at.date_naive();
        if let Some(from) = self.date_from
            && day < from
        {
            return false;
        }
        if let Some(to) = self.date_to
            && day > to
        {
            return false;
        }
        true
    }
}
