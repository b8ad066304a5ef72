use std::sync::Arc;

use bazaar_infra::store::CatalogStore;
use bazaar_infra::{CartService, CheckoutService, CheckoutSettings, OrderService, Stores};

/// Services shared by all handlers.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
}

impl AppServices {
    pub fn new(stores: &Stores, settings: CheckoutSettings) -> Self {
        Self {
            catalog: stores.catalog.clone(),
            carts: CartService::new(stores.catalog.clone(), stores.carts.clone()),
            checkout: CheckoutService::new(stores, settings),
            orders: OrderService::new(stores.orders.clone()),
        }
    }
}
