//! Sale model: value objects, cart, stock exchange types, and lifecycle.

mod cart;
mod model;
mod state;
mod stock;
mod value_objects;

pub use cart::{Cart, CartLine};
pub use model::{LineItem, NewSale, Sale, SaleFilter};
pub use state::SaleStatus;
pub use stock::{CompensationEntry, StockItem, StockSnapshot};
pub use value_objects::{CustomerInfo, Money, PaymentMethod, ProductId};
