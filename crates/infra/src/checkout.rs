//! Cart-to-order conversion and the reconciler that repairs interrupted ones.
//!
//! A checkout writes three documents in order: the catalog stock counters (one
//! guarded batch), the order, and the emptied cart. The journal entry is
//! recorded before the first write and advanced after each one, always as a
//! compare-and-set on the step it was read at.
//!
//! - A stock failure aborts before anything else is written.
//! - The order is written together with its journal step and only while the
//!   entry is unclaimed. Rolling back starts by claiming the entry, so a
//!   stalled request either records its order first or finds the claim and
//!   gives up.
//! - An order failure restores the stock before returning.
//! - A cart failure is left to the reconciler; the order is already valid.
//!   The cart is only emptied if it is still the snapshot that was ordered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use bazaar_cart::{CartCommand, EmptyCart};
use bazaar_catalog::SalesBatch;
use bazaar_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use bazaar_orders::{Currency, Order, OrderCommand, OrderId, PaymentMethod, PlaceOrder};

use crate::cart_service::verify_cart_prices;
use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::events::log_committed;
use crate::journal::{CheckoutEntry, CheckoutStep};
use crate::store::{CartStore, CatalogStore, CheckoutJournal, OrderStore, Stores};

#[derive(Debug, Clone, Default)]
pub struct CheckoutSettings {
    pub currency: Currency,
    /// Re-run the cart price check before converting.
    pub revalidate_prices: bool,
}

/// What one reconciler pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub completed: usize,
    pub rolled_back: usize,
    /// Entries another writer moved while the pass looked at them.
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Completed,
    RolledBack,
    Skipped,
}

#[derive(Clone)]
pub struct CheckoutService {
    catalog: Arc<dyn CatalogStore>,
    carts: Arc<dyn CartStore>,
    orders: Arc<dyn OrderStore>,
    journal: Arc<dyn CheckoutJournal>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(stores: &Stores, settings: CheckoutSettings) -> Self {
        Self {
            catalog: stores.catalog.clone(),
            carts: stores.carts.clone(),
            orders: stores.orders.clone(),
            journal: stores.journal.clone(),
            settings,
        }
    }

    /// Convert the user's cart into an order.
    #[instrument(skip(self), fields(user_id = %user, method = %method), err)]
    pub async fn place_order(
        &self,
        user: UserId,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> ServiceResult<Order> {
        let cart = self
            .carts
            .find_by_user(user)
            .await?
            .ok_or_else(|| DomainError::not_found("cart"))?;
        if self.settings.revalidate_prices {
            verify_cart_prices(self.catalog.as_ref(), &cart).await?;
        }

        let order_id = OrderId::new(AggregateId::new());
        let command = PlaceOrder::from_cart(
            &cart,
            user,
            method,
            self.settings.currency.clone(),
            order_id,
            now,
        )?;
        let batch = SalesBatch::new(order_id.0, command.stock_lines())?;
        let mut order = Order::empty(order_id);
        let events = order.execute(&OrderCommand::PlaceOrder(command.clone()))?;

        let entry = CheckoutEntry::started(command, batch, cart.id_typed(), cart.version(), now);
        self.journal.begin(&entry).await?;

        if let Err(err) = self.catalog.apply_sales(&entry.batch).await {
            self.abandon(&entry, err.to_string()).await;
            return Err(err);
        }

        let reserved = entry.moved_to(CheckoutStep::StockReserved, Utc::now());
        let entry = match self.journal.update(&reserved, &entry.step).await {
            Ok(true) => reserved,
            Ok(false) => return Err(self.claimed_elsewhere(&entry).await),
            Err(err) => {
                error!(order_id = %order_id, error = %err, "journal update failed");
                entry
            }
        };

        let recorded = entry.moved_to(CheckoutStep::OrderRecorded, Utc::now());
        match self.journal.record_order(&recorded, &order).await {
            Ok(true) => {}
            Ok(false) => return Err(self.claimed_elsewhere(&entry).await),
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "order insert failed, restoring stock");
                self.abandon(&entry, err.to_string()).await;
                return Err(err.into());
            }
        }
        log_committed("order", order_id, &events);

        match self.empty_cart(&recorded).await {
            Ok(()) => {
                let completed = recorded.moved_to(CheckoutStep::Completed, Utc::now());
                if let Err(err) = self.journal.update(&completed, &recorded.step).await {
                    error!(order_id = %order_id, error = %err, "journal update failed");
                }
            }
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "cart not emptied after checkout")
            }
        }
        Ok(order)
    }

    /// Finish or roll back every pending checkout last touched at or before
    /// `cutoff`.
    #[instrument(skip(self), err)]
    pub async fn reconcile(&self, cutoff: DateTime<Utc>) -> ServiceResult<ReconcileReport> {
        let pending = self.journal.list_pending(cutoff).await?;
        let mut report = ReconcileReport::default();
        for entry in pending {
            match self.reconcile_entry(&entry).await {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::RolledBack) => report.rolled_back += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(order_id = %entry.order_id, step = entry.step.as_str(), error = %err, "checkout repair failed");
                }
            }
        }
        if report != ReconcileReport::default() {
            info!(
                completed = report.completed,
                rolled_back = report.rolled_back,
                skipped = report.skipped,
                failed = report.failed,
                "reconciled pending checkouts"
            );
        }
        Ok(report)
    }

    async fn reconcile_entry(&self, entry: &CheckoutEntry) -> ServiceResult<Outcome> {
        match &entry.step {
            CheckoutStep::Started | CheckoutStep::StockReserved => {
                if self.orders.get(entry.order_id).await?.is_some() {
                    let recorded = entry.moved_to(CheckoutStep::OrderRecorded, Utc::now());
                    if !self.journal.update(&recorded, &entry.step).await? {
                        return Ok(Outcome::Skipped);
                    }
                    return self.complete(&recorded).await;
                }
                let reason = "checkout interrupted before the order was recorded";
                if self.roll_back(entry, reason.to_string()).await? {
                    Ok(Outcome::RolledBack)
                } else {
                    Ok(Outcome::Skipped)
                }
            }
            CheckoutStep::RollingBack { .. } => {
                if self.finish_rollback(entry).await? {
                    Ok(Outcome::RolledBack)
                } else {
                    Ok(Outcome::Skipped)
                }
            }
            CheckoutStep::OrderRecorded => self.complete(entry).await,
            CheckoutStep::Completed | CheckoutStep::Failed { .. } => Ok(Outcome::Skipped),
        }
    }

    async fn complete(&self, entry: &CheckoutEntry) -> ServiceResult<Outcome> {
        self.empty_cart(entry).await?;
        let completed = entry.moved_to(CheckoutStep::Completed, Utc::now());
        if self.journal.update(&completed, &entry.step).await? {
            Ok(Outcome::Completed)
        } else {
            Ok(Outcome::Skipped)
        }
    }

    /// Empty the cart the order was taken from, unless it changed since.
    async fn empty_cart(&self, entry: &CheckoutEntry) -> ServiceResult<()> {
        let Some(mut cart) = self.carts.find_by_user(entry.user_id).await? else {
            return Ok(());
        };
        if cart.id_typed() != entry.cart_id || cart.version() != entry.cart_version {
            info!(order_id = %entry.order_id, "cart changed since checkout, leaving it");
            return Ok(());
        }
        if cart.is_empty() {
            return Ok(());
        }

        let events = cart.execute(&CartCommand::EmptyCart(EmptyCart {
            owner: entry.user_id,
            occurred_at: Utc::now(),
        }))?;
        match self
            .carts
            .save_if_version(entry.user_id, &cart, entry.cart_version)
            .await
        {
            Ok(()) => log_committed("cart", cart.id_typed(), &events),
            Err(StoreError::Conflict(_)) => {
                info!(order_id = %entry.order_id, "cart changed since checkout, leaving it")
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Claim `entry` for rollback, then restore its stock. Returns `false`
    /// when another writer moved the entry first.
    async fn roll_back(&self, entry: &CheckoutEntry, reason: String) -> ServiceResult<bool> {
        let claimed = entry.moved_to(CheckoutStep::RollingBack { reason }, Utc::now());
        if !self.journal.update(&claimed, &entry.step).await? {
            return Ok(false);
        }
        self.finish_rollback(&claimed).await
    }

    async fn finish_rollback(&self, entry: &CheckoutEntry) -> ServiceResult<bool> {
        let CheckoutStep::RollingBack { reason } = &entry.step else {
            return Err(DomainError::invariant("checkout is not being rolled back").into());
        };
        self.catalog.revert_sales(entry.order_id.0).await?;
        let failed = entry.moved_to(
            CheckoutStep::Failed {
                reason: reason.clone(),
            },
            Utc::now(),
        );
        Ok(self.journal.update(&failed, &entry.step).await?)
    }

    /// Roll back a checkout this request is giving up on. Failures leave the
    /// entry pending for the reconciler.
    async fn abandon(&self, entry: &CheckoutEntry, reason: String) {
        if let Err(err) = self.roll_back(entry, reason).await {
            error!(order_id = %entry.order_id, error = %err, "stock restore failed");
        }
    }

    /// The entry was claimed for rollback while this request still held it.
    /// No order can be recorded any more; make sure the stock taken here is
    /// returned.
    async fn claimed_elsewhere(&self, entry: &CheckoutEntry) -> ServiceError {
        warn!(order_id = %entry.order_id, "checkout was rolled back while in progress");
        if let Err(err) = self.catalog.revert_sales(entry.order_id.0).await {
            error!(order_id = %entry.order_id, error = %err, "stock restore failed");
        }
        StoreError::conflict("checkout was interrupted and rolled back; try again").into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::cart_service::CartService;
    use crate::store::{
        InMemoryCartStore, InMemoryCatalogStore, InMemoryCheckoutJournal, InMemoryOrderStore,
    };
    use bazaar_cart::{Cart, MergeItems, RequestedItem};
    use bazaar_catalog::{NewProduct, Product, ProductId};
    use bazaar_orders::{OrderStatus, PaymentStatus};

    struct FlakyOrders {
        inner: InMemoryOrderStore,
        fail_insert: AtomicBool,
        /// Park inserts until `release` is notified.
        stall_insert: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl OrderStore for FlakyOrders {
        async fn insert(&self, order: &Order) -> Result<(), StoreError> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(StoreError::backend("orders unavailable"));
            }
            if self.stall_insert.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.insert(order).await
        }
        async fn get(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.get(id).await
        }
        async fn list_by_user(&self, user: UserId) -> Result<Vec<Order>, StoreError> {
            self.inner.list_by_user(user).await
        }
        async fn list_page(&self, offset: u64, limit: u64) -> Result<Vec<Order>, StoreError> {
            self.inner.list_page(offset, limit).await
        }
        async fn count(&self) -> Result<u64, StoreError> {
            self.inner.count().await
        }
        async fn save(&self, order: &Order, expected_version: u64) -> Result<(), StoreError> {
            self.inner.save(order, expected_version).await
        }
    }

    struct FlakyCarts {
        inner: InMemoryCartStore,
        fail_save: AtomicBool,
        /// Saved right after the read that brings `reads_left` to zero, as if
        /// another request wrote the cart in between.
        concurrent_write: Mutex<Option<Cart>>,
        reads_left: AtomicUsize,
    }

    #[async_trait]
    impl CartStore for FlakyCarts {
        async fn find_by_user(&self, user: UserId) -> Result<Option<Cart>, StoreError> {
            let found = self.inner.find_by_user(user).await;
            let due = self
                .reads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                == Ok(1);
            if due {
                let pending = self.concurrent_write.lock().unwrap().take();
                if let Some(cart) = pending {
                    self.inner.save(user, &cart).await?;
                }
            }
            found
        }
        async fn insert(&self, user: UserId, cart: &Cart) -> Result<(), StoreError> {
            self.inner.insert(user, cart).await
        }
        async fn save(&self, user: UserId, cart: &Cart) -> Result<(), StoreError> {
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(StoreError::backend("carts unavailable"));
            }
            self.inner.save(user, cart).await
        }
        async fn save_if_version(
            &self,
            user: UserId,
            cart: &Cart,
            expected_version: u64,
        ) -> Result<(), StoreError> {
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(StoreError::backend("carts unavailable"));
            }
            self.inner.save_if_version(user, cart, expected_version).await
        }
        async fn delete(&self, user: UserId) -> Result<bool, StoreError> {
            self.inner.delete(user).await
        }
    }

    struct Fixture {
        stores: Stores,
        orders: Arc<FlakyOrders>,
        carts: Arc<FlakyCarts>,
        checkout: CheckoutService,
        cart_service: CartService,
    }

    fn fixture(products: Vec<Product>) -> Fixture {
        let orders = Arc::new(FlakyOrders {
            inner: InMemoryOrderStore::new(),
            fail_insert: AtomicBool::new(false),
            stall_insert: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let carts = Arc::new(FlakyCarts {
            inner: InMemoryCartStore::new(),
            fail_save: AtomicBool::new(false),
            concurrent_write: Mutex::new(None),
            reads_left: AtomicUsize::new(0),
        });
        let stores = Stores {
            catalog: Arc::new(InMemoryCatalogStore::with_products(products)),
            carts: carts.clone(),
            orders: orders.clone(),
            journal: InMemoryCheckoutJournal::arc(orders.clone()),
        };
        let checkout = CheckoutService::new(&stores, CheckoutSettings::default());
        let cart_service = CartService::new(stores.catalog.clone(), stores.carts.clone());
        Fixture {
            stores,
            orders,
            carts,
            checkout,
            cart_service,
        }
    }

    fn product(title: &str, price: u64, stock: i64) -> Product {
        Product::new(NewProduct {
            id: ProductId::new(AggregateId::new()),
            title: title.to_string(),
            slug: title.to_lowercase(),
            price,
            quantity: stock,
            sold: 0,
            colors: vec![],
        })
        .unwrap()
    }

    async fn fill_cart(fx: &Fixture, user: UserId, lines: &[(ProductId, i64)]) -> Cart {
        let items = lines
            .iter()
            .map(|(id, qty)| RequestedItem::parse(&id.to_string(), &json!(qty), None).unwrap())
            .collect();
        fx.cart_service
            .merge_items(user, items, Utc::now())
            .await
            .unwrap()
    }

    async fn stock(fx: &Fixture, id: ProductId) -> (i64, i64) {
        let p = fx.stores.catalog.get(id).await.unwrap().unwrap();
        (p.quantity(), p.sold())
    }

    /// Journal entry and order for a checkout of `cart` that no request has
    /// started writing yet.
    fn pending_checkout(cart: &Cart, user: UserId) -> (CheckoutEntry, Order) {
        let order_id = OrderId::new(AggregateId::new());
        let command = PlaceOrder::from_cart(
            cart,
            user,
            PaymentMethod::CashOnDelivery,
            Currency::default(),
            order_id,
            Utc::now(),
        )
        .unwrap();
        let batch = SalesBatch::new(order_id.0, command.stock_lines()).unwrap();
        let mut order = Order::empty(order_id);
        order
            .execute(&OrderCommand::PlaceOrder(command.clone()))
            .unwrap();
        let entry = CheckoutEntry::started(command, batch, cart.id_typed(), cart.version(), Utc::now());
        (entry, order)
    }

    #[tokio::test]
    async fn cash_on_delivery_checkout() {
        let shuka = product("Shuka", 2_500, 10);
        let kikoi = product("Kikoi", 1_800, 4);
        let (a, b) = (shuka.id(), kikoi.id());
        let fx = fixture(vec![shuka, kikoi]);
        let user = UserId::new();
        fill_cart(&fx, user, &[(a, 2), (b, 1)]).await;

        let order = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap();

        assert_eq!(order.order_status(), OrderStatus::NotProcessed);
        let intent = order.payment_intent().unwrap();
        assert_eq!(intent.amount, 6_800);
        assert_eq!(intent.status, PaymentStatus::Created);
        assert_eq!(intent.currency.as_str(), "KES");
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.ordered_by(), Some(user));

        assert_eq!(stock(&fx, a).await, (8, 2));
        assert_eq!(stock(&fx, b).await, (3, 1));

        let cart = fx.cart_service.get_cart(user).await.unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.cart_total(), 0);

        let entry = fx.stores.journal.get(order.id_typed()).await.unwrap().unwrap();
        assert_eq!(entry.step, CheckoutStep::Completed);
        assert!(fx.stores.orders.get(order.id_typed()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mpesa_is_paid_and_pending() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        fill_cart(&fx, user, &[(id, 1)]).await;

        let order = fx
            .checkout
            .place_order(user, PaymentMethod::MPesa, Utc::now())
            .await
            .unwrap();
        assert_eq!(order.order_status(), OrderStatus::Pending);
        assert_eq!(order.payment_intent().unwrap().status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn no_cart_is_not_found() {
        let fx = fixture(vec![]);
        let err = fx
            .checkout
            .place_order(UserId::new(), PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Domain(DomainError::not_found("cart")));
    }

    #[tokio::test]
    async fn emptied_cart_cannot_be_ordered_twice() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        fill_cart(&fx, user, &[(id, 1)]).await;

        fx.checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap();
        let err = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::NotFound(_))));
        assert_eq!(stock(&fx, id).await, (9, 1));
    }

    #[tokio::test]
    async fn same_snapshot_converts_once() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        let cart = fill_cart(&fx, user, &[(id, 1)]).await;

        // another request already journaled this snapshot
        let other = OrderId::new(AggregateId::new());
        let command = PlaceOrder::from_cart(
            &cart,
            user,
            PaymentMethod::CashOnDelivery,
            Currency::default(),
            other,
            Utc::now(),
        )
        .unwrap();
        let batch = SalesBatch::new(other.0, command.stock_lines()).unwrap();
        let entry = CheckoutEntry::started(command, batch, cart.id_typed(), cart.version(), Utc::now());
        fx.stores.journal.begin(&entry).await.unwrap();

        let err = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Conflict(_))));
        assert_eq!(stock(&fx, id).await, (10, 0));
    }

    #[tokio::test]
    async fn insufficient_stock_writes_nothing() {
        let shuka = product("Shuka", 2_500, 5);
        let id = shuka.id();
        let fx = fixture(vec![shuka.clone()]);
        let user = UserId::new();
        fill_cart(&fx, user, &[(id, 3)]).await;

        // stock sold elsewhere after the cart was filled
        let mut drained = shuka;
        drained.record_sale(4).unwrap();
        fx.stores.catalog.upsert(drained).await.unwrap();

        let err = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InsufficientStock { requested: 3, available: 1, .. })
        ));
        assert_eq!(stock(&fx, id).await, (1, 4));
        assert_eq!(fx.stores.orders.count().await.unwrap(), 0);
        assert_eq!(fx.cart_service.get_cart(user).await.unwrap().items().len(), 1);
        assert!(fx.stores.journal.list_pending(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn racing_checkouts_never_oversell() {
        let last = product("Last one", 1_000, 1);
        let id = last.id();
        let fx = fixture(vec![last]);
        let (alice, bob) = (UserId::new(), UserId::new());
        fill_cart(&fx, alice, &[(id, 1)]).await;
        fill_cart(&fx, bob, &[(id, 1)]).await;

        let a = fx.checkout.clone();
        let b = fx.checkout.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.place_order(alice, PaymentMethod::CashOnDelivery, Utc::now()).await }),
            tokio::spawn(async move { b.place_order(bob, PaymentMethod::CashOnDelivery, Utc::now()).await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ServiceError::Domain(DomainError::InsufficientStock { .. }))
        )));
        assert_eq!(stock(&fx, id).await, (0, 1));
        assert_eq!(fx.stores.orders.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn order_write_failure_restores_stock() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        fill_cart(&fx, user, &[(id, 2)]).await;
        fx.orders.fail_insert.store(true, Ordering::SeqCst);

        let err = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Backend(_))));
        assert_eq!(stock(&fx, id).await, (10, 0));
        assert_eq!(fx.cart_service.get_cart(user).await.unwrap().cart_total(), 5_000);
        assert!(fx.stores.journal.list_pending(Utc::now()).await.unwrap().is_empty());

        // the failed entry does not block a retry of the same snapshot
        fx.orders.fail_insert.store(false, Ordering::SeqCst);
        fx.checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap();
        assert_eq!(stock(&fx, id).await, (8, 2));
    }

    #[tokio::test]
    async fn reconciler_empties_cart_after_failed_cart_write() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        fill_cart(&fx, user, &[(id, 2)]).await;
        fx.carts.fail_save.store(true, Ordering::SeqCst);

        let order = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap();
        let entry = fx.stores.journal.get(order.id_typed()).await.unwrap().unwrap();
        assert_eq!(entry.step, CheckoutStep::OrderRecorded);
        assert!(!fx.cart_service.get_cart(user).await.unwrap().is_empty());

        fx.carts.fail_save.store(false, Ordering::SeqCst);
        let report = fx.checkout.reconcile(Utc::now()).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                completed: 1,
                ..ReconcileReport::default()
            }
        );
        assert!(fx.cart_service.get_cart(user).await.unwrap().is_empty());
        assert_eq!(stock(&fx, id).await, (8, 2));

        // nothing left to do
        assert_eq!(
            fx.checkout.reconcile(Utc::now()).await.unwrap(),
            ReconcileReport::default()
        );
    }

    #[tokio::test]
    async fn reconciler_rolls_back_checkout_without_order() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        let cart = fill_cart(&fx, user, &[(id, 3)]).await;

        // crash right after the stock was taken
        let order_id = OrderId::new(AggregateId::new());
        let command = PlaceOrder::from_cart(
            &cart,
            user,
            PaymentMethod::CashOnDelivery,
            Currency::default(),
            order_id,
            Utc::now(),
        )
        .unwrap();
        let batch = SalesBatch::new(order_id.0, command.stock_lines()).unwrap();
        let entry = CheckoutEntry::started(command, batch, cart.id_typed(), cart.version(), Utc::now());
        fx.stores.journal.begin(&entry).await.unwrap();
        fx.stores.catalog.apply_sales(&entry.batch).await.unwrap();
        let reserved = entry.moved_to(CheckoutStep::StockReserved, Utc::now());
        assert!(fx.stores.journal.update(&reserved, &entry.step).await.unwrap());
        assert_eq!(stock(&fx, id).await, (7, 3));

        let report = fx.checkout.reconcile(Utc::now()).await.unwrap();
        assert_eq!(report.rolled_back, 1);
        assert_eq!(stock(&fx, id).await, (10, 0));
        assert_eq!(fx.cart_service.get_cart(user).await.unwrap().items().len(), 1);
        let entry = fx.stores.journal.get(order_id).await.unwrap().unwrap();
        assert!(matches!(entry.step, CheckoutStep::Failed { .. }));
    }

    #[tokio::test]
    async fn reconciler_skips_entries_newer_than_cutoff() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        let cart = fill_cart(&fx, user, &[(id, 1)]).await;

        let order_id = OrderId::new(AggregateId::new());
        let command = PlaceOrder::from_cart(
            &cart,
            user,
            PaymentMethod::CashOnDelivery,
            Currency::default(),
            order_id,
            Utc::now(),
        )
        .unwrap();
        let batch = SalesBatch::new(order_id.0, command.stock_lines()).unwrap();
        let entry = CheckoutEntry::started(command, batch, cart.id_typed(), cart.version(), Utc::now());
        fx.stores.journal.begin(&entry).await.unwrap();

        let cutoff = entry.updated_at - chrono::Duration::seconds(30);
        assert_eq!(
            fx.checkout.reconcile(cutoff).await.unwrap(),
            ReconcileReport::default()
        );
        let still = fx.stores.journal.get(order_id).await.unwrap().unwrap();
        assert_eq!(still.step, CheckoutStep::Started);
    }

    #[tokio::test]
    async fn revalidation_rejects_repriced_cart() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let mut fx = fixture(vec![shuka.clone()]);
        fx.checkout = CheckoutService::new(
            &fx.stores,
            CheckoutSettings {
                revalidate_prices: true,
                ..CheckoutSettings::default()
            },
        );
        let user = UserId::new();
        fill_cart(&fx, user, &[(id, 1)]).await;

        let mut repriced = shuka;
        repriced.set_price(2_000).unwrap();
        fx.stores.catalog.upsert(repriced).await.unwrap();

        let err = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::PriceMismatch { .. })));
        assert_eq!(stock(&fx, id).await, (10, 0));
    }

    #[tokio::test]
    async fn stalled_checkout_keeps_its_order_when_reconciled() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        fill_cart(&fx, user, &[(id, 2)]).await;
        fx.orders.stall_insert.store(true, Ordering::SeqCst);

        let checkout = fx.checkout.clone();
        let request = tokio::spawn(async move {
            checkout
                .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
                .await
        });
        fx.orders.entered.notified().await;

        // a pass that considers the stalled request abandoned
        let reconciler = fx.checkout.clone();
        let pass = tokio::spawn(async move {
            reconciler
                .reconcile(Utc::now() + chrono::Duration::seconds(60))
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        fx.orders.release.notify_one();

        let order = request.await.unwrap().unwrap();
        let report = pass.await.unwrap().unwrap();
        assert_eq!(report.rolled_back, 0);
        assert_eq!(report.failed, 0);

        assert_eq!(stock(&fx, id).await, (8, 2));
        assert!(fx.stores.orders.get(order.id_typed()).await.unwrap().is_some());
        let entry = fx.stores.journal.get(order.id_typed()).await.unwrap().unwrap();
        assert_eq!(entry.step, CheckoutStep::Completed);
        assert!(fx.cart_service.get_cart(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claimed_entry_refuses_the_order() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        let cart = fill_cart(&fx, user, &[(id, 1)]).await;
        let (entry, order) = pending_checkout(&cart, user);
        fx.stores.journal.begin(&entry).await.unwrap();

        let claimed = entry.moved_to(
            CheckoutStep::RollingBack {
                reason: "stalled".to_string(),
            },
            Utc::now(),
        );
        assert!(fx.stores.journal.update(&claimed, &entry.step).await.unwrap());

        // the request that still holds the entry at `Started` loses
        let recorded = entry.moved_to(CheckoutStep::OrderRecorded, Utc::now());
        assert!(!fx.stores.journal.record_order(&recorded, &order).await.unwrap());
        let reserved = entry.moved_to(CheckoutStep::StockReserved, Utc::now());
        assert!(!fx.stores.journal.update(&reserved, &entry.step).await.unwrap());

        assert!(fx.stores.orders.get(order.id_typed()).await.unwrap().is_none());
        let stored = fx.stores.journal.get(order.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.step, claimed.step);
    }

    #[tokio::test]
    async fn reconciler_finishes_interrupted_rollback() {
        let shuka = product("Shuka", 2_500, 10);
        let id = shuka.id();
        let fx = fixture(vec![shuka]);
        let user = UserId::new();
        let cart = fill_cart(&fx, user, &[(id, 4)]).await;
        let (entry, _) = pending_checkout(&cart, user);
        fx.stores.journal.begin(&entry).await.unwrap();
        fx.stores.catalog.apply_sales(&entry.batch).await.unwrap();

        // claimed, then the process died before the stock came back
        let claimed = entry.moved_to(
            CheckoutStep::RollingBack {
                reason: "order store down".to_string(),
            },
            Utc::now(),
        );
        assert!(fx.stores.journal.update(&claimed, &entry.step).await.unwrap());
        assert_eq!(stock(&fx, id).await, (6, 4));

        let report = fx.checkout.reconcile(Utc::now()).await.unwrap();
        assert_eq!(report.rolled_back, 1);
        assert_eq!(stock(&fx, id).await, (10, 0));
        let stored = fx.stores.journal.get(entry.order_id).await.unwrap().unwrap();
        assert_eq!(
            stored.step,
            CheckoutStep::Failed {
                reason: "order store down".to_string()
            }
        );
    }

    #[tokio::test]
    async fn concurrent_cart_write_survives_checkout() {
        let shuka = product("Shuka", 2_500, 10);
        let kikoi = product("Kikoi", 1_800, 10);
        let (a, b) = (shuka.id(), kikoi.id());
        let fx = fixture(vec![shuka, kikoi.clone()]);
        let user = UserId::new();
        let cart = fill_cart(&fx, user, &[(a, 1)]).await;

        // another request merges Kikoi between checkout's read of the cart
        // and its write of the emptied one
        let mut newer = cart.clone();
        let line = RequestedItem::parse(&b.to_string(), &json!(1), None)
            .unwrap()
            .resolve(&kikoi)
            .unwrap();
        newer
            .execute(&CartCommand::MergeItems(MergeItems {
                owner: user,
                lines: vec![line],
                occurred_at: Utc::now(),
            }))
            .unwrap();
        *fx.carts.concurrent_write.lock().unwrap() = Some(newer.clone());
        fx.carts.reads_left.store(2, Ordering::SeqCst);

        let order = fx
            .checkout
            .place_order(user, PaymentMethod::CashOnDelivery, Utc::now())
            .await
            .unwrap();
        assert_eq!(order.items().len(), 1);

        let kept = fx.cart_service.get_cart(user).await.unwrap();
        assert_eq!(kept, newer);
        assert_eq!(kept.items().len(), 2);
        assert_eq!(stock(&fx, a).await, (9, 1));
        assert_eq!(stock(&fx, b).await, (10, 0));
    }
}
