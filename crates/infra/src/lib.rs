//! Infrastructure layer: storage adapters and the services that orchestrate
//! the cart and order aggregates against them.
//!
//! - `store`: catalog, cart, order and checkout-journal stores (in-memory, and
//!   Postgres behind the `postgres` feature)
//! - `cart_service`, `checkout`, `order_service`: the operations the API exposes
//! - `seed`: catalog loading at startup

pub mod cart_service;
pub mod checkout;
pub mod error;
mod events;
pub mod journal;
pub mod order_service;
pub mod pagination;
pub mod seed;
pub mod store;

pub use cart_service::CartService;
pub use checkout::{CheckoutService, CheckoutSettings, ReconcileReport};
pub use error::{ServiceError, ServiceResult, StoreError};
pub use journal::{CheckoutEntry, CheckoutStep};
pub use order_service::OrderService;
pub use pagination::{Page, PageRequest};
pub use seed::{SeedError, load_seed_file, parse_seed, seed_catalog};
pub use store::Stores;
