//! In-memory stores for tests/dev.
//!
//! `RwLock`-guarded maps; no map lock is held across an await point. The sales
//! batch is checked and applied under a single write lock. The journal
//! serializes its step changes behind an async gate that is also held while
//! it writes an order, so recording an order and claiming the entry for
//! rollback cannot interleave.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use bazaar_cart::Cart;
use bazaar_catalog::{Product, ProductId, SalesBatch};
use bazaar_core::{AggregateId, AggregateRoot, UserId};
use bazaar_orders::{Order, OrderId};

use super::{CartStore, CatalogStore, CheckoutJournal, OrderStore};
use crate::error::{ServiceResult, StoreError};
use crate::journal::{CheckoutEntry, CheckoutStep};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read().map_err(|_| StoreError::backend("lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write().map_err(|_| StoreError::backend("lock poisoned"))
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    /// Applied batches keyed by order id (idempotency + compensation).
    applied: HashMap<AggregateId, SalesBatch>,
}

/// In-memory product catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.write() {
            state
                .products
                .extend(products.into_iter().map(|p| (p.id(), p)));
        }
        store
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn get(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(read(&self.state)?.products.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>, StoreError> {
        let state = read(&self.state)?;
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let state = read(&self.state)?;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.title().cmp(b.title()).then(a.id().cmp(&b.id())));
        Ok(products)
    }

    async fn upsert(&self, product: Product) -> Result<(), StoreError> {
        write(&self.state)?.products.insert(product.id(), product);
        Ok(())
    }

    async fn apply_sales(&self, batch: &SalesBatch) -> ServiceResult<bool> {
        let mut state = write(&self.state)?;
        if state.applied.contains_key(&batch.order_id()) {
            return Ok(false);
        }
        bazaar_catalog::apply_sales(&mut state.products, batch)?;
        state.applied.insert(batch.order_id(), batch.clone());
        Ok(true)
    }

    async fn revert_sales(&self, order_id: AggregateId) -> ServiceResult<bool> {
        let mut state = write(&self.state)?;
        let Some(batch) = state.applied.get(&order_id).cloned() else {
            return Ok(false);
        };
        bazaar_catalog::revert_sales(&mut state.products, &batch)?;
        state.applied.remove(&order_id);
        Ok(true)
    }
}

/// In-memory cart documents keyed by user.
#[derive(Debug, Default)]
pub struct InMemoryCartStore {
    carts: RwLock<HashMap<UserId, Cart>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn find_by_user(&self, user: UserId) -> Result<Option<Cart>, StoreError> {
        Ok(read(&self.carts)?.get(&user).cloned())
    }

    async fn insert(&self, user: UserId, cart: &Cart) -> Result<(), StoreError> {
        let mut carts = write(&self.carts)?;
        if carts.contains_key(&user) {
            return Err(StoreError::conflict(format!("user {user} already has a cart")));
        }
        carts.insert(user, cart.clone());
        Ok(())
    }

    async fn save(&self, user: UserId, cart: &Cart) -> Result<(), StoreError> {
        write(&self.carts)?.insert(user, cart.clone());
        Ok(())
    }

    async fn save_if_version(
        &self,
        user: UserId,
        cart: &Cart,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut carts = write(&self.carts)?;
        match carts.get(&user) {
            Some(stored)
                if stored.id_typed() == cart.id_typed() && stored.version() == expected_version =>
            {
                carts.insert(user, cart.clone());
                Ok(())
            }
            _ => Err(StoreError::conflict(format!(
                "cart of user {user} changed since version {expected_version}"
            ))),
        }
    }

    async fn delete(&self, user: UserId) -> Result<bool, StoreError> {
        Ok(write(&self.carts)?.remove(&user).is_some())
    }
}

/// In-memory order documents.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

/// Newest first; UUIDv7 ids break ties in creation order.
fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.id_typed().cmp(&a.id_typed()))
    });
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = write(&self.orders)?;
        if orders.contains_key(&order.id_typed()) {
            return Err(StoreError::conflict(format!(
                "order {} already exists",
                order.id_typed()
            )));
        }
        orders.insert(order.id_typed(), order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(read(&self.orders)?.get(&id).cloned())
    }

    async fn list_by_user(&self, user: UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = read(&self.orders)?
            .values()
            .filter(|o| o.ordered_by() == Some(user))
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn list_page(&self, offset: u64, limit: u64) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = read(&self.orders)?.values().cloned().collect();
        newest_first(&mut orders);
        Ok(orders
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(read(&self.orders)?.len() as u64)
    }

    async fn save(&self, order: &Order, expected_version: u64) -> Result<(), StoreError> {
        let mut orders = write(&self.orders)?;
        let current = orders
            .get(&order.id_typed())
            .map(|o| o.version())
            .ok_or_else(|| StoreError::conflict(format!("order {} does not exist", order.id_typed())))?;
        if current != expected_version {
            return Err(StoreError::conflict(format!(
                "order {} is at version {current}, expected {expected_version}",
                order.id_typed()
            )));
        }
        orders.insert(order.id_typed(), order.clone());
        Ok(())
    }
}

/// In-memory checkout journal. Orders recorded through it go to `orders`.
pub struct InMemoryCheckoutJournal {
    entries: RwLock<HashMap<OrderId, CheckoutEntry>>,
    orders: Arc<dyn OrderStore>,
    gate: Mutex<()>,
}

impl InMemoryCheckoutJournal {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self {
            entries: RwLock::default(),
            orders,
            gate: Mutex::new(()),
        }
    }

    pub fn arc(orders: Arc<dyn OrderStore>) -> Arc<Self> {
        Arc::new(Self::new(orders))
    }

    fn stored_step(&self, order_id: OrderId) -> Result<Option<CheckoutStep>, StoreError> {
        Ok(read(&self.entries)?.get(&order_id).map(|e| e.step.clone()))
    }
}

#[async_trait]
impl CheckoutJournal for InMemoryCheckoutJournal {
    async fn begin(&self, entry: &CheckoutEntry) -> Result<(), StoreError> {
        let mut entries = write(&self.entries)?;
        if entries.contains_key(&entry.order_id) {
            return Err(StoreError::conflict(format!(
                "checkout for order {} already journaled",
                entry.order_id
            )));
        }
        let duplicate = entries.values().any(|e| {
            e.cart_id == entry.cart_id
                && e.cart_version == entry.cart_version
                && !matches!(e.step, CheckoutStep::Failed { .. })
        });
        if duplicate {
            return Err(StoreError::conflict("cart is already being checked out"));
        }
        entries.insert(entry.order_id, entry.clone());
        Ok(())
    }

    async fn update(
        &self,
        entry: &CheckoutEntry,
        expected: &CheckoutStep,
    ) -> Result<bool, StoreError> {
        let _gate = self.gate.lock().await;
        let mut entries = write(&self.entries)?;
        match entries.get_mut(&entry.order_id) {
            Some(existing) if existing.step.same_as(expected) => {
                *existing = entry.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_order(&self, entry: &CheckoutEntry, order: &Order) -> Result<bool, StoreError> {
        let _gate = self.gate.lock().await;
        match self.stored_step(entry.order_id)? {
            Some(step) if step.accepts_order() => {}
            _ => return Ok(false),
        }
        self.orders.insert(order).await?;
        if let Some(existing) = write(&self.entries)?.get_mut(&entry.order_id) {
            *existing = entry.clone();
        }
        Ok(true)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<CheckoutEntry>, StoreError> {
        Ok(read(&self.entries)?.get(&order_id).cloned())
    }

    async fn list_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<CheckoutEntry>, StoreError> {
        let mut pending: Vec<CheckoutEntry> = read(&self.entries)?
            .values()
            .filter(|e| e.step.is_pending() && e.updated_at <= cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.updated_at);
        Ok(pending)
    }
}
