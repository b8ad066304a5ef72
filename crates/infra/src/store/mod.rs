//! Storage abstractions for the catalog, carts, orders and the checkout journal.
//!
//! Each trait has an in-memory implementation for tests/dev and a Postgres
//! implementation behind the `postgres` feature. Carts, orders and journal
//! entries are stored as whole documents; products keep their counters in
//! columns so the sales batch can be applied with a conditional update.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bazaar_cart::Cart;
use bazaar_catalog::{Product, ProductId, SalesBatch};
use bazaar_core::{AggregateId, UserId};
use bazaar_orders::{Order, OrderId};

use crate::error::{ServiceResult, StoreError};
use crate::journal::{CheckoutEntry, CheckoutStep};

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::{
    InMemoryCartStore, InMemoryCatalogStore, InMemoryCheckoutJournal, InMemoryOrderStore,
};

/// Product catalog with guarded stock counters.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Fetch several products at once; missing ids are simply absent.
    async fn get_many(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>, StoreError>;

    async fn list(&self) -> Result<Vec<Product>, StoreError>;

    async fn upsert(&self, product: Product) -> Result<(), StoreError>;

    /// Apply a sales batch in one conditional operation.
    ///
    /// Every product must exist and hold enough stock, otherwise nothing is
    /// changed and the domain error is returned. Returns `false` when a batch
    /// for the same order was already applied.
    async fn apply_sales(&self, batch: &SalesBatch) -> ServiceResult<bool>;

    /// Undo the batch applied for `order_id`. Returns `false` if there was none.
    async fn revert_sales(&self, order_id: AggregateId) -> ServiceResult<bool>;
}

/// One cart document per user.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn find_by_user(&self, user: UserId) -> Result<Option<Cart>, StoreError>;

    /// Create the user's cart. Fails with `Conflict` if one already exists.
    async fn insert(&self, user: UserId, cart: &Cart) -> Result<(), StoreError>;

    /// Create or overwrite the user's cart (last write wins).
    async fn save(&self, user: UserId, cart: &Cart) -> Result<(), StoreError>;

    /// Overwrite the user's cart only if the stored one is the same cart at
    /// `expected_version`. Fails with `Conflict` otherwise.
    async fn save_if_version(
        &self,
        user: UserId,
        cart: &Cart,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    /// Returns `false` if the user had no cart.
    async fn delete(&self, user: UserId) -> Result<bool, StoreError>;
}

/// Order documents.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `Conflict` if the id is taken.
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// The user's orders, newest first.
    async fn list_by_user(&self, user: UserId) -> Result<Vec<Order>, StoreError>;

    /// All orders, newest first.
    async fn list_page(&self, offset: u64, limit: u64) -> Result<Vec<Order>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Overwrite an order if its stored version is still `expected_version`.
    async fn save(&self, order: &Order, expected_version: u64) -> Result<(), StoreError>;
}

/// Outbox of in-flight checkouts.
///
/// Step changes are compare-and-set on the stored step, so the request that
/// runs a checkout and the reconciler repairing it never both act on the
/// same entry.
#[async_trait]
pub trait CheckoutJournal: Send + Sync {
    /// Record a new entry. Fails with `Conflict` if the same cart snapshot
    /// already has a non-failed entry.
    async fn begin(&self, entry: &CheckoutEntry) -> Result<(), StoreError>;

    /// Store `entry` if the stored step is still `expected`. Returns `false`
    /// when another writer moved it first.
    async fn update(&self, entry: &CheckoutEntry, expected: &CheckoutStep)
        -> Result<bool, StoreError>;

    /// Insert `order` and store `entry` (at `OrderRecorded`) as one write,
    /// provided the stored entry has not been claimed for rollback. Returns
    /// `false` and writes nothing when it has.
    async fn record_order(&self, entry: &CheckoutEntry, order: &Order) -> Result<bool, StoreError>;

    async fn get(&self, order_id: OrderId) -> Result<Option<CheckoutEntry>, StoreError>;

    /// Pending entries last touched at or before `cutoff`, oldest first.
    async fn list_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<CheckoutEntry>, StoreError>;
}

/// The four stores a running service needs, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
    pub journal: Arc<dyn CheckoutJournal>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let orders = InMemoryOrderStore::arc();
        Self {
            catalog: InMemoryCatalogStore::arc(),
            carts: InMemoryCartStore::arc(),
            journal: InMemoryCheckoutJournal::arc(orders.clone()),
            orders,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            catalog: Arc::new(postgres::PostgresCatalogStore::new(pool.clone())),
            carts: Arc::new(postgres::PostgresCartStore::new(pool.clone())),
            orders: Arc::new(postgres::PostgresOrderStore::new(pool.clone())),
            journal: Arc::new(postgres::PostgresCheckoutJournal::new(pool)),
        }
    }
}
