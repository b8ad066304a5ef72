//! Product catalog (leaf domain module).
//!
//! The cart and order workflow reads prices, stock and colors from here and
//! never owns them. The only writes are the guarded sale/restock adjustments
//! applied after checkout.

pub mod product;
pub mod stock;

pub use product::{NewProduct, Product, ProductId};
pub use stock::{SalesBatch, StockAdjustment, apply_sales, revert_sales};
